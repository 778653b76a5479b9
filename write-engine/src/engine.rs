use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::StoredObject;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::content::ContentRecord;
use crate::index::SecondaryIndex;
use crate::operation::{Operation, OperationPayload};

/// The write-ahead content-operations engine (C7, spec §4.5). Every mutation is first
/// durably enqueued as an `Operation`, then best-effort supersedes older pending operations
/// for the same content id, then is executed under the operation's own CAS lock against the
/// content record and every registered secondary index.
pub struct WriteEngine {
    db: Arc<SurrealDbClient>,
    indexes: HashMap<String, Arc<dyn SecondaryIndex>>,
}

impl WriteEngine {
    #[must_use]
    pub fn new(db: Arc<SurrealDbClient>, indexes: Vec<Arc<dyn SecondaryIndex>>) -> Self {
        let indexes = indexes.into_iter().map(|idx| (idx.id().to_string(), idx)).collect();
        Self { db, indexes }
    }

    /// Upsert a `ContentRecord`. Phase 1 (enqueue) is mandatory; phases 2/3 are best-effort
    /// and never fail the public call (spec §4.5).
    #[instrument(skip(self, content, metadata), fields(content_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        &self,
        content_id: &str,
        content: Vec<u8>,
        mime: impl Into<String>,
        title: Option<String>,
        description: Option<String>,
        tags: serde_json::Value,
        metadata: serde_json::Value,
    ) -> Result<String, AppError> {
        let index_ids: Vec<String> = self.indexes.keys().cloned().collect();
        let payload = OperationPayload::Upsert {
            content,
            mime: mime.into(),
            title,
            description,
            tags,
            metadata,
        };
        let operation = Operation::plan_upsert(content_id, payload, &index_ids);
        let operation_id = self.enqueue(operation).await?;

        if let Err(err) = self.supersede_older_pending(content_id, &operation_id, true).await {
            warn!(content_id, error = %err, "supersede phase failed; new operation is still authoritative");
        }

        if let Err(err) = self.drain(content_id).await {
            info!(content_id, error = %err, "synchronous drain did not complete; background worker will retry");
        }

        Ok(operation_id)
    }

    /// Delete a `ContentRecord`. Delete operations are never superseded/cancelled (spec
    /// §4.5 phase 2, testable property 6: "Delete cannot be cancelled").
    #[instrument(skip(self))]
    pub async fn delete(&self, content_id: &str) -> Result<String, AppError> {
        let index_ids: Vec<String> = self.indexes.keys().cloned().collect();
        let operation = Operation::plan_delete(content_id, &index_ids);
        let operation_id = self.enqueue(operation).await?;

        if let Err(err) = self.supersede_older_pending(content_id, &operation_id, false).await {
            warn!(content_id, error = %err, "supersede phase failed for delete; draining anyway");
        }

        if let Err(err) = self.drain(content_id).await {
            info!(content_id, error = %err, "synchronous drain did not complete; background worker will retry");
        }

        Ok(operation_id)
    }

    /// Phase 1: durably insert the operation row. If this fails, the public API fails and
    /// nothing else has happened (spec §4.5).
    async fn enqueue(&self, operation: Operation) -> Result<String, AppError> {
        let id = operation.id.clone();
        self.db.store_item(operation).await?;
        Ok(id)
    }

    /// Phase 2: mark every older, non-complete operation for this `content_id` cancelled.
    /// Only Upsert-planned operations are cancellable, and only when the new operation is
    /// itself an Upsert (spec §4.5: "Never cancel Delete operations — they must drain").
    async fn supersede_older_pending(
        &self,
        content_id: &str,
        new_operation_id: &str,
        new_is_upsert: bool,
    ) -> Result<(), AppError> {
        if !new_is_upsert {
            return Ok(());
        }

        let pending = self.pending_operations_for(content_id).await?;
        for op in pending {
            if op.id == new_operation_id || op.complete || !op.is_upsert_plan() {
                continue;
            }
            let mut cancelled = op;
            cancelled.cancelled = true;
            cancelled.updated_at = Utc::now();
            self.db.upsert_item(cancelled).await?;
        }
        Ok(())
    }

    async fn pending_operations_for(&self, content_id: &str) -> Result<Vec<Operation>, AppError> {
        let mut response = self
            .db
            .client
            .query("SELECT * FROM operation WHERE content_id = $content_id AND complete = false ORDER BY timestamp ASC")
            .bind(("content_id", content_id.to_string()))
            .await?;
        let rows: Vec<Operation> = response.take(0)?;
        Ok(rows)
    }

    /// Processing: recursively claim-execute-release the oldest non-complete operation for
    /// `content_id`, draining the queue until none remain (spec §4.5 "Processing").
    #[instrument(skip(self))]
    pub async fn drain(&self, content_id: &str) -> Result<(), AppError> {
        let Some(operation) = self.oldest_pending(content_id).await? else {
            return Ok(());
        };

        if operation.cancelled {
            let mut op = operation;
            op.complete = true;
            op.updated_at = Utc::now();
            self.db.upsert_item(op).await?;
            return Box::pin(self.drain(content_id)).await;
        }

        if operation.is_locked() {
            info!(content_id, operation_id = %operation.id, "operation already locked by another worker; stopping");
            return Ok(());
        }

        let Some(mut operation) = self.try_claim(operation).await? else {
            info!(content_id, "lost the claim race to another worker; stopping");
            return Ok(());
        };

        self.db
            .client
            .query("UPDATE content_record SET ready = false WHERE id = $id")
            .bind(("id", content_id.to_string()))
            .await?;

        match self.execute_steps(content_id, &mut operation).await {
            Ok(()) => {
                operation.complete = true;
                operation.updated_at = Utc::now();
                self.db.upsert_item(operation).await?;
                self.mark_content_ready(content_id).await?;
                Box::pin(self.drain(content_id)).await
            }
            Err(err) => {
                operation.last_failure = Some(err.to_string());
                operation.updated_at = Utc::now();
                self.db.upsert_item(operation).await?;
                warn!(content_id, error = %err, "operation failed; left Locked for operator recovery");
                Err(err)
            }
        }
    }

    async fn oldest_pending(&self, content_id: &str) -> Result<Option<Operation>, AppError> {
        Ok(self.pending_operations_for(content_id).await?.into_iter().next())
    }

    /// The only gate: `UPDATE operation SET last_attempt_at = now WHERE id = $id AND
    /// last_attempt_at IS NULL`. Zero rows updated means another worker won (spec §4.5 step
    /// 4, §5: "no preemption, no recovery probes").
    async fn try_claim(&self, operation: Operation) -> Result<Option<Operation>, AppError> {
        #[derive(Deserialize)]
        struct ClaimRow {
            id: String,
        }

        let mut response = self
            .db
            .client
            .query("UPDATE operation SET last_attempt_at = $now WHERE id = $id AND last_attempt_at IS NONE RETURN id")
            .bind(("now", Utc::now()))
            .bind(("id", operation.id.clone()))
            .await?;
        let claimed: Vec<ClaimRow> = response.take(0)?;

        if claimed.is_empty() {
            return Ok(None);
        }

        let mut locked = operation;
        locked.last_attempt_at = Some(Utc::now());
        Ok(Some(locked))
    }

    async fn execute_steps(&self, content_id: &str, operation: &mut Operation) -> Result<(), AppError> {
        while let Some(step) = operation.remaining_steps.first().cloned() {
            self.execute_step(content_id, &step, &operation.payload).await?;
            operation.remaining_steps.remove(0);
            operation.completed_steps.push(step);
            operation.updated_at = Utc::now();
            self.db.upsert_item(operation.clone()).await?;
        }
        Ok(())
    }

    async fn execute_step(&self, content_id: &str, step: &str, payload: &OperationPayload) -> Result<(), AppError> {
        match step {
            "upsert" => self.step_upsert(content_id, payload).await,
            "delete" => self.step_delete(content_id).await,
            other if other.starts_with("index:") && other.ends_with(":delete") => {
                let id = &other["index:".len()..other.len() - ":delete".len()];
                self.step_index_delete(id, content_id).await
            }
            other if other.starts_with("index:") => {
                let id = &other["index:".len()..];
                self.step_index(id, content_id, payload).await
            }
            other => Err(AppError::PermanentIo(format!("unknown operation step '{other}'"))),
        }
    }

    async fn step_upsert(&self, content_id: &str, payload: &OperationPayload) -> Result<(), AppError> {
        let OperationPayload::Upsert {
            content,
            mime,
            title,
            description,
            tags,
            metadata,
        } = payload
        else {
            return Err(AppError::PermanentIo("upsert step received a Delete payload".into()));
        };

        let existing: Option<ContentRecord> = self.db.get_item(content_id).await?;
        let created_at = existing.map_or_else(Utc::now, |r| r.created_at);

        let record = ContentRecord {
            id: content_id.to_string(),
            created_at,
            updated_at: Utc::now(),
            content: content.clone(),
            mime: mime.clone(),
            byte_size: content.len() as u64,
            ready: false,
            title: title.clone(),
            description: description.clone(),
            tags: serde_json::from_value(tags.clone()).unwrap_or_default(),
            metadata: metadata.clone(),
        };
        self.db.upsert_item(record).await?;
        Ok(())
    }

    async fn step_delete(&self, content_id: &str) -> Result<(), AppError> {
        let _: Option<ContentRecord> = self.db.delete_item(content_id).await?;
        Ok(())
    }

    async fn step_index(&self, index_id: &str, content_id: &str, payload: &OperationPayload) -> Result<(), AppError> {
        let OperationPayload::Upsert { content, mime, .. } = payload else {
            return Err(AppError::PermanentIo("index step received a Delete payload".into()));
        };
        let index = self
            .indexes
            .get(index_id)
            .ok_or_else(|| AppError::PermanentIo(format!("search index '{index_id}' is not currently configured")))?;
        index.index(content_id, content, mime).await
    }

    async fn step_index_delete(&self, index_id: &str, content_id: &str) -> Result<(), AppError> {
        let index = self
            .indexes
            .get(index_id)
            .ok_or_else(|| AppError::PermanentIo(format!("search index '{index_id}' is not currently configured")))?;
        index.remove(content_id).await
    }

    async fn mark_content_ready(&self, content_id: &str) -> Result<(), AppError> {
        self.db
            .client
            .query("UPDATE content_record SET ready = true, updated_at = $now WHERE id = $id")
            .bind(("now", Utc::now()))
            .bind(("id", content_id.to_string()))
            .await?;
        Ok(())
    }

    pub async fn get_content(&self, content_id: &str) -> Result<Option<ContentRecord>, AppError> {
        Ok(self.db.get_item(content_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use common::utils::config::test_config_memory;

    struct RecordingIndex {
        id: String,
        indexed: Arc<StdMutex<Vec<String>>>,
        removed: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl SecondaryIndex for RecordingIndex {
        fn id(&self) -> &str {
            &self.id
        }

        async fn index(&self, content_id: &str, _content: &[u8], _mime: &str) -> Result<(), AppError> {
            self.indexed.lock().expect("lock").push(content_id.to_string());
            Ok(())
        }

        async fn remove(&self, content_id: &str) -> Result<(), AppError> {
            self.removed.lock().expect("lock").push(content_id.to_string());
            Ok(())
        }
    }

    async fn engine_with_recording_index() -> (WriteEngine, Arc<StdMutex<Vec<String>>>, Arc<StdMutex<Vec<String>>>) {
        let _ = test_config_memory();
        let db = Arc::new(SurrealDbClient::memory("we_ns", &uuid::Uuid::new_v4().to_string()).await.expect("db"));
        let indexed = Arc::new(StdMutex::new(Vec::new()));
        let removed = Arc::new(StdMutex::new(Vec::new()));
        let index = Arc::new(RecordingIndex {
            id: "vector".to_string(),
            indexed: indexed.clone(),
            removed: removed.clone(),
        });
        (WriteEngine::new(db, vec![index]), indexed, removed)
    }

    #[tokio::test]
    async fn upsert_creates_content_and_fans_out_to_indexes() {
        let (engine, indexed, _removed) = engine_with_recording_index().await;
        engine
            .upsert("doc1", b"hello".to_vec(), "text/plain", None, None, serde_json::json!({}), serde_json::json!({}))
            .await
            .expect("upsert");

        let record = engine.get_content("doc1").await.expect("get").expect("present");
        assert_eq!(record.content, b"hello");
        assert!(record.ready);
        assert_eq!(indexed.lock().expect("lock").as_slice(), &["doc1".to_string()]);
    }

    #[tokio::test]
    async fn second_upsert_cancels_first_pending_operation() {
        let (engine, _indexed, _removed) = engine_with_recording_index().await;
        engine
            .upsert("doc1", b"A".to_vec(), "text/plain", None, None, serde_json::json!({}), serde_json::json!({}))
            .await
            .expect("first upsert");
        engine
            .upsert("doc1", b"B".to_vec(), "text/plain", None, None, serde_json::json!({}), serde_json::json!({}))
            .await
            .expect("second upsert");

        let record = engine.get_content("doc1").await.expect("get").expect("present");
        assert_eq!(record.content, b"B");

        let mut response = engine
            .db
            .client
            .query("SELECT * FROM operation WHERE content_id = $id ORDER BY timestamp ASC")
            .bind(("id", "doc1".to_string()))
            .await
            .expect("query");
        let ops: Vec<Operation> = response.take(0).expect("rows");
        assert_eq!(ops.len(), 2);
        assert!(ops[1].complete);
    }

    #[tokio::test]
    async fn delete_removes_content_and_is_idempotent() {
        let (engine, _indexed, removed) = engine_with_recording_index().await;
        engine
            .upsert("doc1", b"hello".to_vec(), "text/plain", None, None, serde_json::json!({}), serde_json::json!({}))
            .await
            .expect("upsert");
        engine.delete("doc1").await.expect("delete");

        assert!(engine.get_content("doc1").await.expect("get").is_none());
        assert_eq!(removed.lock().expect("lock").as_slice(), &["doc1".to_string()]);

        engine.delete("doc1").await.expect("delete is idempotent");
    }

    #[tokio::test]
    async fn missing_index_id_is_permanent_error_and_leaves_operation_locked() {
        let db = Arc::new(SurrealDbClient::memory("we_ns2", &uuid::Uuid::new_v4().to_string()).await.expect("db"));
        let engine = WriteEngine::new(db, vec![]);
        let operation = Operation::plan_upsert(
            "doc1",
            OperationPayload::Upsert {
                content: b"x".to_vec(),
                mime: "text/plain".to_string(),
                title: None,
                description: None,
                tags: serde_json::json!({}),
                metadata: serde_json::json!({}),
            },
            &["vector".to_string()],
        );
        engine.enqueue(operation).await.expect("enqueue");

        let result = engine.drain("doc1").await;
        assert!(result.is_err());

        let mut response = engine
            .db
            .client
            .query("SELECT * FROM operation WHERE content_id = $id")
            .bind(("id", "doc1".to_string()))
            .await
            .expect("query");
        let ops: Vec<Operation> = response.take(0).expect("rows");
        assert_eq!(ops.len(), 1);
        assert!(!ops[0].complete);
        assert!(ops[0].last_attempt_at.is_some());
        assert!(ops[0].last_failure.is_some());
    }
}
