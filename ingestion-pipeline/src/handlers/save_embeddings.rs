use async_trait::async_trait;
use common::error::Outcome;
use common::storage::types::pipeline::{ArtifactType, Pipeline};
use tracing::instrument;

use crate::handler::{Handler, HandlerContext};

/// `save_embeddings` (spec §4.3): routes every `TextEmbeddingVector` artifact produced by
/// `gen_embeddings` through the write engine so it lands in the content record table and
/// fans out to every registered secondary index (the vector index among them). This is the
/// only handler allowed to call `write_engine.upsert`. Advisory-idempotent: a record id
/// already recorded on the pipeline is skipped.
pub struct SaveEmbeddingsHandler;

#[async_trait]
impl Handler for SaveEmbeddingsHandler {
    fn name(&self) -> &'static str {
        "save_embeddings"
    }

    #[instrument(skip(self, pipeline, ctx))]
    async fn handle(&self, pipeline: &Pipeline, ctx: &HandlerContext) -> Outcome<Pipeline> {
        let mut next = pipeline.clone();

        let vectors: Vec<_> = next
            .files
            .iter()
            .flat_map(|file| file.generated_files.iter())
            .filter(|g| g.artifact_type == ArtifactType::TextEmbeddingVector)
            .cloned()
            .collect();

        for vector in vectors {
            if next.saved_memory_record_ids().contains(&vector.id) {
                continue;
            }

            let bytes = match ctx.storage.get(&vector.blob_location).await {
                Ok(bytes) => bytes,
                Err(err) => return Outcome::Transient(err.to_string()),
            };

            let record: common::storage::types::memory_record::MemoryRecord = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(err) => return Outcome::Permanent(err.to_string()),
            };

            let title = record.payload.get("file_name").and_then(|v| v.as_str()).map(String::from);

            if let Err(err) = ctx
                .write_engine
                .upsert(
                    &vector.id,
                    bytes.to_vec(),
                    "application/json",
                    title,
                    None,
                    serde_json::json!(next.tags.to_composite()),
                    serde_json::json!({ "index": next.index, "document_id": next.document_id }),
                )
                .await
            {
                return Outcome::Transient(err.to_string());
            }

            next.record_saved_memory_record(vector.id.clone());
        }

        Outcome::Success(next)
    }
}
