use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use common::storage::types::memory_record::MemoryRecord;
use tokio::sync::RwLock;
use write_engine::SecondaryIndex;

use crate::vector_index::VectorIndex;

/// Adapts a `VectorIndex` collection to the write engine's `SecondaryIndex` contract
/// (spec §4.5 step semantics `index:<id>` / `index:<id>:delete`). The write engine's
/// `content` bytes for an embedding operation are the JSON-serialized `MemoryRecord`
/// produced by the `gen_embeddings` handler; this adapter only deserializes and stores —
/// it never re-embeds, since embedding already happened upstream.
///
/// Every `MemoryRecord` carries its own tenant index (spec §4.6), so the collection a
/// record is stored under is read from the record itself rather than fixed at
/// construction — one `VectorIndexSecondaryIndex` serves every tenant. `remove` only gets
/// a bare `content_id` from the write engine (the `ContentRecord` carrying the index is
/// already gone by the time the `index:<id>:delete` step runs), so this adapter tracks
/// which collection each content id was last indexed under.
pub struct VectorIndexSecondaryIndex {
    id: String,
    index: Arc<dyn VectorIndex>,
    collections: RwLock<HashMap<String, String>>,
}

impl VectorIndexSecondaryIndex {
    #[must_use]
    pub fn new(id: impl Into<String>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            id: id.into(),
            index,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SecondaryIndex for VectorIndexSecondaryIndex {
    fn id(&self) -> &str {
        &self.id
    }

    async fn index(&self, content_id: &str, content: &[u8], _mime: &str) -> Result<(), AppError> {
        let mut record: MemoryRecord = serde_json::from_slice(content)
            .map_err(|err| AppError::PermanentIo(format!("invalid memory record payload for '{content_id}': {err}")))?;
        record.id = content_id.to_string();
        let collection = record.index.clone();
        self.index.upsert(&collection, record).await?;
        self.collections.write().await.insert(content_id.to_string(), collection);
        Ok(())
    }

    async fn remove(&self, content_id: &str) -> Result<(), AppError> {
        let collection = self.collections.write().await.remove(content_id);
        let Some(collection) = collection else {
            return Ok(());
        };
        self.index.delete(&collection, content_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::InMemoryVectorIndex;
    use common::tags::TagSet;

    fn record(id: &str) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            index: "default".to_string(),
            document_id: "doc1".to_string(),
            vector: vec![1.0, 0.0],
            tags: TagSet::new(),
            payload: serde_json::json!({"text": "hi"}),
        }
    }

    #[tokio::test]
    async fn index_step_deserializes_and_stores() {
        let vector_index = InMemoryVectorIndex::shared();
        let adapter = VectorIndexSecondaryIndex::new("vector", vector_index.clone());

        let bytes = serde_json::to_vec(&record("r1")).unwrap();
        adapter.index("r1", &bytes, "application/json").await.unwrap();

        let results = vector_index.get_list("default", &[], 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "r1");
    }

    #[tokio::test]
    async fn index_step_routes_by_the_record_own_index_not_a_fixed_collection() {
        let vector_index = InMemoryVectorIndex::shared();
        let adapter = VectorIndexSecondaryIndex::new("vector", vector_index.clone());

        let mut tenant_record = record("r1");
        tenant_record.index = "tenant-a".to_string();
        let bytes = serde_json::to_vec(&tenant_record).unwrap();
        adapter.index("r1", &bytes, "application/json").await.unwrap();

        let tenant_hits = vector_index.get_list("tenant-a", &[], 10).await.unwrap();
        assert_eq!(tenant_hits.len(), 1);
        let default_hits = vector_index.get_list("default", &[], 10).await.unwrap();
        assert!(default_hits.is_empty());
    }

    #[tokio::test]
    async fn remove_step_is_idempotent() {
        let vector_index = InMemoryVectorIndex::shared();
        let adapter = VectorIndexSecondaryIndex::new("vector", vector_index.clone());
        adapter.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn remove_step_deletes_from_the_collection_it_was_indexed_under() {
        let vector_index = InMemoryVectorIndex::shared();
        let adapter = VectorIndexSecondaryIndex::new("vector", vector_index.clone());

        let mut tenant_record = record("r1");
        tenant_record.index = "tenant-a".to_string();
        let bytes = serde_json::to_vec(&tenant_record).unwrap();
        adapter.index("r1", &bytes, "application/json").await.unwrap();

        adapter.remove("r1").await.unwrap();

        let tenant_hits = vector_index.get_list("tenant-a", &[], 10).await.unwrap();
        assert!(tenant_hits.is_empty());
    }
}
