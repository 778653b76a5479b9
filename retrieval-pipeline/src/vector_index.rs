use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use common::storage::db::SurrealDbClient;
use common::storage::types::memory_record::MemoryRecord;
use common::tags::TagFilter;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::instrument;

/// The reserved collection name that `delete_index` refuses to remove (spec §4.6, §6).
pub const DEFAULT_INDEX: &str = "default";

/// Normalize an index name to lowercase with reserved characters replaced by `-`, max 128
/// chars, and not starting/ending with `-` (spec §4.6).
pub fn normalize_index_name(name: &str) -> Result<String, AppError> {
    let normalized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect();

    if normalized.is_empty() {
        return Err(AppError::Validation("index name must not be empty".into()));
    }
    if normalized.len() > 128 {
        return Err(AppError::Validation(format!("index name '{normalized}' exceeds 128 characters")));
    }
    if normalized.starts_with('-') || normalized.ends_with('-') {
        return Err(AppError::Validation(format!(
            "index name '{normalized}' must not start or end with '-'"
        )));
    }
    Ok(normalized)
}

/// Vector Index collaborator (C8, spec §4.6). Implementations own one physical store for
/// every logical named collection.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn create_index(&self, name: &str, vector_dim: usize) -> Result<(), AppError>;

    /// `delete_index("default")` is a no-op (spec §4.6, §8 boundary S6).
    async fn delete_index(&self, name: &str) -> Result<(), AppError>;

    async fn list_indexes(&self) -> Result<Vec<String>, AppError>;

    async fn upsert(&self, name: &str, record: MemoryRecord) -> Result<(), AppError>;

    /// Missing id is not an error (spec §4.6).
    async fn delete(&self, name: &str, id: &str) -> Result<(), AppError>;

    /// Ordered by descending cosine similarity in `[0,1]` (spec §4.6, §9 Open Question 2).
    async fn get_similar(
        &self,
        name: &str,
        embedding: &[f32],
        filters: &[TagFilter],
        min_relevance: f32,
        limit: usize,
    ) -> Result<Vec<(MemoryRecord, f32)>, AppError>;

    async fn get_list(
        &self,
        name: &str,
        filters: &[TagFilter],
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, AppError>;

    /// Every record id belonging to `document_id` within `name` (spec §4.3
    /// `delete_document`: "removal from blob + every vector index"). Used by the
    /// `delete_document` handler to enumerate what to route through the write engine,
    /// since a deletion-only pipeline carries no `saved_memory_record_ids`.
    async fn list_ids_for_document(&self, name: &str, document_id: &str) -> Result<Vec<String>, AppError>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Rescale a `[-1,1]` cosine value into `[0,1]` so every backend produces identical scores
/// for identical inputs (spec §9 Open Question 2, resolved in DESIGN.md).
#[must_use]
pub fn rescale_cosine(cosine: f32) -> f32 {
    (cosine + 1.0) / 2.0
}

/// In-memory `VectorIndex` driver (config `VectorKind::LocalFile`). Brute-force cosine scan;
/// adequate for tests and small deployments.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, HashMap<String, MemoryRecord>>>,
}

impl InMemoryVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    #[instrument(skip(self))]
    async fn create_index(&self, name: &str, _vector_dim: usize) -> Result<(), AppError> {
        let name = normalize_index_name(name)?;
        self.collections.write().await.entry(name).or_default();
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<(), AppError> {
        let name = normalize_index_name(name)?;
        if name == DEFAULT_INDEX {
            tracing::warn!("refusing to delete the reserved 'default' index");
            return Ok(());
        }
        self.collections.write().await.remove(&name);
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>, AppError> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn upsert(&self, name: &str, record: MemoryRecord) -> Result<(), AppError> {
        let name = normalize_index_name(name)?;
        if normalize_index_name(&record.index)? != name {
            return Err(AppError::Validation(format!(
                "record '{}' carries index '{}' but was routed to collection '{name}'",
                record.id, record.index
            )));
        }
        let mut collections = self.collections.write().await;
        let collection = collections.entry(name).or_default();
        collection.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, name: &str, id: &str) -> Result<(), AppError> {
        let name = normalize_index_name(name)?;
        if let Some(collection) = self.collections.write().await.get_mut(&name) {
            collection.remove(id);
        }
        Ok(())
    }

    async fn get_similar(
        &self,
        name: &str,
        embedding: &[f32],
        filters: &[TagFilter],
        min_relevance: f32,
        limit: usize,
    ) -> Result<Vec<(MemoryRecord, f32)>, AppError> {
        let name = normalize_index_name(name)?;
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&name) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(MemoryRecord, f32)> = collection
            .values()
            .filter(|record| common::tags::any_filter_matches(filters, &record.tags))
            .map(|record| (record.clone(), rescale_cosine(cosine_similarity(embedding, &record.vector))))
            .filter(|(_, score)| *score >= min_relevance)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn get_list(&self, name: &str, filters: &[TagFilter], limit: usize) -> Result<Vec<MemoryRecord>, AppError> {
        let name = normalize_index_name(name)?;
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&name) else {
            return Ok(Vec::new());
        };

        let mut records: Vec<MemoryRecord> = collection
            .values()
            .filter(|record| common::tags::any_filter_matches(filters, &record.tags))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records.truncate(limit);
        Ok(records)
    }

    async fn list_ids_for_document(&self, name: &str, document_id: &str) -> Result<Vec<String>, AppError> {
        let name = normalize_index_name(name)?;
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&name) else {
            return Ok(Vec::new());
        };
        Ok(collection
            .values()
            .filter(|record| record.document_id == document_id)
            .map(|record| record.id.clone())
            .collect())
    }
}

/// SurrealDB-backed `VectorIndex` driver (config `VectorKind::Surreal`), using the
/// `vector::similarity::cosine` function against the HNSW index defined by
/// `common::storage::indexes` (spec §4.6, §9 Open Question 2).
pub struct SurrealVectorIndex {
    db: Arc<SurrealDbClient>,
}

impl SurrealVectorIndex {
    #[must_use]
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VectorIndex for SurrealVectorIndex {
    async fn create_index(&self, name: &str, vector_dim: usize) -> Result<(), AppError> {
        let _ = normalize_index_name(name)?;
        self.db.ensure_initialized(vector_dim).await
    }

    async fn delete_index(&self, name: &str) -> Result<(), AppError> {
        let name = normalize_index_name(name)?;
        if name == DEFAULT_INDEX {
            tracing::warn!("refusing to delete the reserved 'default' index");
            return Ok(());
        }
        self.db
            .client
            .query("DELETE memory_record WHERE index = $index")
            .bind(("index", name))
            .await?;
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>, AppError> {
        #[derive(Deserialize)]
        struct Row {
            index: String,
        }
        let mut response = self
            .db
            .client
            .query("SELECT index FROM memory_record GROUP BY index")
            .await?;
        let rows: Vec<Row> = response.take(0)?;
        Ok(rows.into_iter().map(|r| r.index).collect())
    }

    async fn upsert(&self, name: &str, mut record: MemoryRecord) -> Result<(), AppError> {
        let name = normalize_index_name(name)?;
        record.index = normalize_index_name(&record.index)?;
        if record.index != name {
            return Err(AppError::Validation(format!(
                "record '{}' carries index '{}' but was routed to collection '{name}'",
                record.id, record.index
            )));
        }
        self.db.upsert_item(record).await?;
        Ok(())
    }

    async fn delete(&self, _name: &str, id: &str) -> Result<(), AppError> {
        let _: Option<MemoryRecord> = self.db.delete_item(id).await?;
        Ok(())
    }

    async fn get_similar(
        &self,
        name: &str,
        embedding: &[f32],
        filters: &[TagFilter],
        min_relevance: f32,
        limit: usize,
    ) -> Result<Vec<(MemoryRecord, f32)>, AppError> {
        let name = normalize_index_name(name)?;
        let query = "SELECT *, vector::similarity::cosine(vector, $embedding) AS raw_score \
                      FROM memory_record WHERE index = $index \
                      ORDER BY raw_score DESC LIMIT $limit";
        let mut response = self
            .db
            .client
            .query(query)
            .bind(("embedding", embedding.to_vec()))
            .bind(("index", name))
            .bind(("limit", limit as i64))
            .await?;

        #[derive(Deserialize)]
        struct RawRow {
            #[serde(flatten)]
            record: MemoryRecord,
            raw_score: f32,
        }
        let rows: Vec<RawRow> = response.take(0)?;

        let scored: Vec<(MemoryRecord, f32)> = rows
            .into_iter()
            .map(|row| (row.record, rescale_cosine(row.raw_score)))
            .filter(|(record, score)| *score >= min_relevance && common::tags::any_filter_matches(filters, &record.tags))
            .collect();
        Ok(scored)
    }

    async fn get_list(&self, name: &str, filters: &[TagFilter], limit: usize) -> Result<Vec<MemoryRecord>, AppError> {
        let name = normalize_index_name(name)?;
        let mut response = self
            .db
            .client
            .query("SELECT * FROM memory_record WHERE index = $index LIMIT $limit")
            .bind(("index", name))
            .bind(("limit", limit as i64))
            .await?;
        let rows: Vec<MemoryRecord> = response.take(0)?;
        Ok(rows
            .into_iter()
            .filter(|record| common::tags::any_filter_matches(filters, &record.tags))
            .collect())
    }

    async fn list_ids_for_document(&self, name: &str, document_id: &str) -> Result<Vec<String>, AppError> {
        let name = normalize_index_name(name)?;
        #[derive(Deserialize)]
        struct IdRow {
            id: String,
        }
        let mut response = self
            .db
            .client
            .query("SELECT id FROM memory_record WHERE index = $index AND document_id = $document_id")
            .bind(("index", name))
            .bind(("document_id", document_id.to_string()))
            .await?;
        let rows: Vec<IdRow> = response.take(0)?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::StoredObject;
    use common::tags::TagSet;

    fn record(id: &str, index: &str, vector: Vec<f32>) -> MemoryRecord {
        let mut tags = TagSet::new();
        let _ = tags.insert("user", "Taylor");
        MemoryRecord {
            id: id.to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            index: index.to_string(),
            document_id: "doc1".to_string(),
            vector,
            tags,
            payload: serde_json::json!({"text": "hello"}),
        }
    }

    #[test]
    fn normalize_replaces_reserved_chars_and_lowercases() {
        assert_eq!(normalize_index_name("My Index_1").unwrap(), "my-index-1");
    }

    #[test]
    fn normalize_rejects_leading_hyphen() {
        assert!(normalize_index_name("-bad").is_err());
    }

    #[test]
    fn rescale_maps_full_cosine_range() {
        assert!((rescale_cosine(1.0) - 1.0).abs() < 1e-6);
        assert!((rescale_cosine(-1.0) - 0.0).abs() < 1e-6);
        assert!((rescale_cosine(0.0) - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn upsert_then_get_similar_ranks_by_cosine() {
        let index = InMemoryVectorIndex::new();
        index.create_index("default", 3).await.unwrap();
        index.upsert("default", record("a", "default", vec![1.0, 0.0, 0.0])).await.unwrap();
        index.upsert("default", record("b", "default", vec![0.0, 1.0, 0.0])).await.unwrap();

        let results = index
            .get_similar("default", &[1.0, 0.0, 0.0], &[], 0.0, 10)
            .await
            .unwrap();
        assert_eq!(results[0].0.id, "a");
        assert!(results[0].1 > results[1].1);
    }

    #[tokio::test]
    async fn get_similar_filters_by_tag() {
        let index = InMemoryVectorIndex::new();
        let mut blake_tags = TagSet::new();
        blake_tags.insert("user", "Blake").unwrap();
        let mut rec = record("a", "default", vec![1.0, 0.0]);
        rec.tags = blake_tags;
        index.upsert("default", rec).await.unwrap();

        let filter = TagFilter::new().with("user", "Taylor");
        let results = index.get_similar("default", &[1.0, 0.0], &[filter], 0.0, 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let index = InMemoryVectorIndex::new();
        index.upsert("default", record("a", "default", vec![1.0])).await.unwrap();
        index.delete("default", "a").await.unwrap();
        let results = index.get_list("default", &[], 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn delete_index_is_noop_for_reserved_default_name() {
        let index = InMemoryVectorIndex::new();
        index.upsert("default", record("a", "default", vec![1.0])).await.unwrap();
        index.delete_index("Default").await.unwrap();
        let results = index.get_list("default", &[], 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
