use async_trait::async_trait;
use common::error::Outcome;
use common::storage::types::memory_record::MemoryRecord;
use common::storage::types::pipeline::{ArtifactType, GeneratedFile, Pipeline};
use tracing::instrument;

use crate::handler::{Handler, HandlerContext};

/// `gen_embeddings` (spec §4.3): calls every configured embedding generator over every
/// partition/summary artifact, recording which generator and model produced each vector
/// in the artifact name. Fans out independently per (artifact, generator) pair so a crash
/// mid-fan-out only re-does the missing pairs on replay.
pub struct GenEmbeddingsHandler;

#[async_trait]
impl Handler for GenEmbeddingsHandler {
    fn name(&self) -> &'static str {
        "gen_embeddings"
    }

    #[instrument(skip(self, pipeline, ctx))]
    async fn handle(&self, pipeline: &Pipeline, ctx: &HandlerContext) -> Outcome<Pipeline> {
        let mut next = pipeline.clone();
        let mut seq: u32 = 0;

        for file_idx in 0..next.files.len() {
            let embeddable: Vec<GeneratedFile> = next.files[file_idx]
                .generated_files
                .iter()
                .filter(|g| matches!(g.artifact_type, ArtifactType::TextPartition | ArtifactType::SyntheticData))
                .cloned()
                .collect();

            for artifact in embeddable {
                let text = match ctx.storage.get(&artifact.blob_location).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(err) => return Outcome::Transient(err.to_string()),
                };

                for provider in &ctx.embedding_providers {
                    let model = provider.model_name().to_string();
                    let record_id = MemoryRecord::derive_id(&next.index, &next.document_id, seq, &model);

                    let already_embedded = next.files[file_idx]
                        .generated_files
                        .iter()
                        .any(|g| g.artifact_type == ArtifactType::TextEmbeddingVector && g.id == record_id);
                    if already_embedded {
                        continue;
                    }

                    let vector = match provider.embed(&text).await {
                        Ok(vector) => vector,
                        Err(err) if err.is_retryable() => return Outcome::Transient(err.to_string()),
                        Err(err) => return Outcome::Permanent(err.to_string()),
                    };

                    if vector.len() != provider.dimensions() {
                        return Outcome::Permanent(format!(
                            "embedding generator '{model}' returned dimension {} but {} was expected",
                            vector.len(),
                            provider.dimensions()
                        ));
                    }

                    let record = MemoryRecord {
                        id: record_id.clone(),
                        created_at: chrono::Utc::now(),
                        updated_at: chrono::Utc::now(),
                        index: next.index.clone(),
                        document_id: next.document_id.clone(),
                        vector,
                        tags: next.tags.clone(),
                        payload: serde_json::json!({
                            "file_name": next.files[file_idx].name,
                            "text": text,
                            "page_number": serde_json::Value::Null,
                            "last_update": chrono::Utc::now(),
                            "generator_model": model,
                        }),
                    };

                    let location = format!(
                        "{}/{}/{}.embedding.{seq}.{model}.json",
                        next.index, next.document_id, next.files[file_idx].id
                    );
                    let bytes = match serde_json::to_vec(&record) {
                        Ok(bytes) => bytes,
                        Err(err) => return Outcome::Permanent(err.to_string()),
                    };
                    if let Err(err) = ctx.storage.put(&location, bytes.into()).await {
                        return Outcome::Transient(err.to_string());
                    }

                    next.files[file_idx].generated_files.push(GeneratedFile {
                        id: record_id,
                        parent_id: artifact.id.clone(),
                        name: format!("embedding-{model}"),
                        artifact_type: ArtifactType::TextEmbeddingVector,
                        blob_location: location,
                    });
                }
                seq += 1;
            }
        }

        Outcome::Success(next)
    }
}
