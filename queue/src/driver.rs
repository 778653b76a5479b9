use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::error::AppError;
use common::utils::config::RetryConfig;
use tokio::sync::Mutex;

use crate::message::{Delivery, QueuedMessage};
use crate::name::{normalize_queue_name, poison_queue_name};

/// Message Queue collaborator (C3, spec §4.1). `connect` is idempotent; `enqueue` returns
/// only once the broker acknowledges durability; `dequeue_batch`/`ack`/`nack` implement the
/// at-least-once delivery loop that `on_message` (see `worker`) drives.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn connect(&self, name: &str) -> Result<(), AppError>;

    async fn enqueue(&self, name: &str, payload: Vec<u8>) -> Result<(), AppError>;

    /// Pop up to `batch_size` currently-visible messages, marking them invisible for
    /// `visibility.fetch_lock_secs` (spec §4.1's per-message visibility lock).
    async fn dequeue_batch(&self, name: &str, batch_size: u32) -> Result<Vec<Delivery>, AppError>;

    /// Acknowledge successful processing; removes the message.
    async fn ack(&self, name: &str, message_id: &str) -> Result<(), AppError>;

    /// Negative-acknowledge: re-queue with a visibility delay (spec §4.1:
    /// "nacked with a visibility delay of `dequeue_count x 1s`"), or move to poison if
    /// `dequeue_count` now exceeds `max_retries_before_poison`.
    async fn nack(&self, name: &str, message_id: &str, delay: Duration) -> Result<(), AppError>;

    /// Drop expired messages and return the count dropped (spec §4.1: "Message TTL is
    /// bounded; expired messages are dropped by the broker").
    async fn sweep_expired(&self, name: &str) -> Result<usize, AppError>;
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedMessage>,
    in_flight: HashMap<String, QueuedMessage>,
}

/// Local-file queue driver (config `QueueKind::LocalFile`). Despite the name, state lives
/// in-process behind a mutex; the name mirrors the teacher's "local" backend naming
/// convention for drivers that don't need an external broker. Companion poison queues are
/// created lazily alongside their parent (spec §4.1).
pub struct LocalFileQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    retry: RetryConfig,
}

impl LocalFileQueue {
    #[must_use]
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            retry,
        }
    }

    #[must_use]
    pub fn shared(retry: RetryConfig) -> Arc<Self> {
        Arc::new(Self::new(retry))
    }

    async fn ensure_queue<'a>(
        queues: &'a mut HashMap<String, QueueState>,
        name: &str,
    ) -> &'a mut QueueState {
        queues.entry(name.to_string()).or_default()
    }
}

#[async_trait]
impl MessageQueue for LocalFileQueue {
    async fn connect(&self, name: &str) -> Result<(), AppError> {
        let name = normalize_queue_name(name)?;
        let poison = poison_queue_name(&name, &self.retry.poison_suffix)?;
        let mut queues = self.queues.lock().await;
        queues.entry(name).or_default();
        queues.entry(poison).or_default();
        Ok(())
    }

    async fn enqueue(&self, name: &str, payload: Vec<u8>) -> Result<(), AppError> {
        let name = normalize_queue_name(name)?;
        let mut queues = self.queues.lock().await;
        let queue = Self::ensure_queue(&mut queues, &name).await;
        queue
            .pending
            .push_back(QueuedMessage::new(payload, self.retry.message_ttl_secs));
        Ok(())
    }

    async fn dequeue_batch(&self, name: &str, batch_size: u32) -> Result<Vec<Delivery>, AppError> {
        let name = normalize_queue_name(name)?;
        let now = Utc::now();
        let mut queues = self.queues.lock().await;
        let queue = Self::ensure_queue(&mut queues, &name).await;

        let mut delivered = Vec::new();
        let mut requeue = VecDeque::new();

        while let Some(mut message) = queue.pending.pop_front() {
            if message.is_expired(now) {
                continue;
            }
            if delivered.len() as u32 >= batch_size {
                requeue.push_back(message);
                continue;
            }
            if !message.is_visible(now) {
                requeue.push_back(message);
                continue;
            }

            message.dequeue_count = message.dequeue_count.saturating_add(1);
            message.visible_at = Some(now + chrono::Duration::seconds(
                i64::try_from(self.retry.fetch_lock_secs).unwrap_or(i64::MAX),
            ));

            delivered.push(Delivery {
                message_id: message.id.clone(),
                payload: message.payload.clone(),
                dequeue_count: message.dequeue_count,
            });
            queue.in_flight.insert(message.id.clone(), message);
        }

        queue.pending.extend(requeue);
        Ok(delivered)
    }

    async fn ack(&self, name: &str, message_id: &str) -> Result<(), AppError> {
        let name = normalize_queue_name(name)?;
        let mut queues = self.queues.lock().await;
        let queue = Self::ensure_queue(&mut queues, &name).await;
        queue.in_flight.remove(message_id);
        Ok(())
    }

    async fn nack(&self, name: &str, message_id: &str, delay: Duration) -> Result<(), AppError> {
        let normalized = normalize_queue_name(name)?;
        let mut queues = self.queues.lock().await;

        let Some(queue) = queues.get_mut(&normalized) else {
            return Ok(());
        };
        let Some(mut message) = queue.in_flight.remove(message_id) else {
            return Ok(());
        };

        if message.dequeue_count > self.retry.max_retries_before_poison {
            let poison = poison_queue_name(&normalized, &self.retry.poison_suffix)?;
            message.visible_at = None;
            message.expires_at = Utc::now() + chrono::Duration::days(36500);
            let poison_queue = Self::ensure_queue(&mut queues, &poison).await;
            poison_queue.pending.push_back(message);
            return Ok(());
        }

        message.visible_at = Some(
            Utc::now()
                + chrono::Duration::milliseconds(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)),
        );
        queue.pending.push_back(message);
        Ok(())
    }

    async fn sweep_expired(&self, name: &str) -> Result<usize, AppError> {
        let name = normalize_queue_name(name)?;
        let now = Utc::now();
        let mut queues = self.queues.lock().await;
        let queue = Self::ensure_queue(&mut queues, &name).await;

        let before = queue.pending.len();
        queue.pending.retain(|message| !message.is_expired(now));
        Ok(before - queue.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry() -> RetryConfig {
        RetryConfig {
            max_retries_before_poison: 2,
            message_ttl_secs: 3600,
            poison_suffix: "-poison".to_string(),
            fetch_lock_secs: 300,
            poll_delay_msecs: 10,
            fetch_batch_size: 3,
        }
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_delivers_payload() {
        let queue = LocalFileQueue::new(retry());
        queue.connect("km-extract").await.unwrap();
        queue.enqueue("km-extract", b"hello".to_vec()).await.unwrap();

        let delivered = queue.dequeue_batch("km-extract", 3).await.unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, b"hello");
        assert_eq!(delivered[0].dequeue_count, 1);
    }

    #[tokio::test]
    async fn in_flight_message_is_not_redelivered_until_visible() {
        let queue = LocalFileQueue::new(retry());
        queue.enqueue("km-extract", b"a".to_vec()).await.unwrap();
        let first = queue.dequeue_batch("km-extract", 3).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = queue.dequeue_batch("km-extract", 3).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn ack_removes_message_permanently() {
        let queue = LocalFileQueue::new(retry());
        queue.enqueue("km-extract", b"a".to_vec()).await.unwrap();
        let delivered = queue.dequeue_batch("km-extract", 3).await.unwrap();
        queue.ack("km-extract", &delivered[0].message_id).await.unwrap();

        // Manually make it visible again: nothing to redeliver since it was acked.
        let again = queue.dequeue_batch("km-extract", 3).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn nack_requeues_with_delay_until_poison_threshold() {
        let queue = LocalFileQueue::new(retry());
        queue.enqueue("km-extract", b"a".to_vec()).await.unwrap();

        for _ in 0..2 {
            let delivered = queue.dequeue_batch("km-extract", 3).await.unwrap();
            assert_eq!(delivered.len(), 1);
            queue
                .nack("km-extract", &delivered[0].message_id, Duration::from_millis(0))
                .await
                .unwrap();
        }

        // Third delivery exceeds max_retries_before_poison=2 and should land in poison.
        let delivered = queue.dequeue_batch("km-extract", 3).await.unwrap();
        assert_eq!(delivered.len(), 1);
        queue
            .nack("km-extract", &delivered[0].message_id, Duration::from_millis(0))
            .await
            .unwrap();

        let main_queue_empty = queue.dequeue_batch("km-extract", 3).await.unwrap();
        assert!(main_queue_empty.is_empty());

        let poison_delivered = queue.dequeue_batch("km-extract-poison", 3).await.unwrap();
        assert_eq!(poison_delivered.len(), 1);
    }
}
