use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A message sitting in a queue, with redelivery bookkeeping (spec §4.1).
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    pub id: String,
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub dequeue_count: u32,
    /// `None` while the message is visible for delivery; `Some(instant)` while a worker
    /// holds the visibility lock.
    pub visible_at: Option<DateTime<Utc>>,
}

impl QueuedMessage {
    #[must_use]
    pub fn new(payload: Vec<u8>, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            enqueued_at: now,
            expires_at: now + chrono::Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
            dequeue_count: 0,
            visible_at: None,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.visible_at.map_or(true, |visible_at| now >= visible_at)
    }
}

/// A message handed to a handler: carries enough for the handler to ack/nack it later.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub message_id: String,
    pub payload: Vec<u8>,
    pub dequeue_count: u32,
}
