use chrono::{DateTime, Utc};
use common::stored_object;
use serde::{Deserialize, Serialize};

/// What an `Operation` is writing: an upsert body or a delete marker (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum OperationPayload {
    Upsert {
        content: Vec<u8>,
        mime: String,
        title: Option<String>,
        description: Option<String>,
        tags: serde_json::Value,
        metadata: serde_json::Value,
    },
    Delete,
}

stored_object!(Operation, "operation", {
    content_id: String,
    timestamp: DateTime<Utc>,
    planned_steps: Vec<String>,
    completed_steps: Vec<String>,
    remaining_steps: Vec<String>,
    payload: OperationPayload,
    cancelled: bool,
    complete: bool,
    last_attempt_at: Option<DateTime<Utc>>,
    last_failure: Option<String>,
});

impl Operation {
    /// Plan an Upsert: `["upsert", "index:<id_1>", ..., "index:<id_n>"]` (spec §4.5).
    #[must_use]
    pub fn plan_upsert(content_id: impl Into<String>, payload: OperationPayload, index_ids: &[String]) -> Self {
        let mut steps = vec!["upsert".to_string()];
        steps.extend(index_ids.iter().map(|id| format!("index:{id}")));
        Self::new(content_id, steps, payload)
    }

    /// Plan a Delete: `["delete", "index:<id_1>:delete", ...]` (spec §4.5). Delete operations
    /// are never cancelled by a later Upsert (spec §4.5 phase 2, testable property 6).
    #[must_use]
    pub fn plan_delete(content_id: impl Into<String>, index_ids: &[String]) -> Self {
        let mut steps = vec!["delete".to_string()];
        steps.extend(index_ids.iter().map(|id| format!("index:{id}:delete")));
        Self::new(content_id, steps, OperationPayload::Delete)
    }

    fn new(content_id: impl Into<String>, steps: Vec<String>, payload: OperationPayload) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            content_id: content_id.into(),
            timestamp: now,
            planned_steps: steps.clone(),
            completed_steps: Vec::new(),
            remaining_steps: steps,
            payload,
            cancelled: false,
            complete: false,
            last_attempt_at: None,
            last_failure: None,
        }
    }

    /// Whether this operation's plan includes the mandatory `upsert` step (spec §4.5 phase
    /// 2: "for Upsert planners"). Used to decide supersede eligibility.
    #[must_use]
    pub fn is_upsert_plan(&self) -> bool {
        self.planned_steps.first().map(String::as_str) == Some("upsert")
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.last_attempt_at.is_some() && !self.complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_upsert_orders_upsert_before_indexes() {
        let op = Operation::plan_upsert(
            "c1",
            OperationPayload::Delete,
            &["idx-a".to_string(), "idx-b".to_string()],
        );
        assert_eq!(op.planned_steps, vec!["upsert", "index:idx-a", "index:idx-b"]);
        assert!(op.is_upsert_plan());
    }

    #[test]
    fn plan_delete_never_reports_as_upsert_plan() {
        let op = Operation::plan_delete("c1", &["idx-a".to_string()]);
        assert_eq!(op.planned_steps, vec!["delete", "index:idx-a:delete"]);
        assert!(!op.is_upsert_plan());
    }

    #[test]
    fn fresh_operation_is_not_locked() {
        let op = Operation::plan_delete("c1", &[]);
        assert!(!op.is_locked());
    }
}
