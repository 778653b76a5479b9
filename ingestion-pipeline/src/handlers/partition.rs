use async_trait::async_trait;
use common::error::{AppError, Outcome};
use common::storage::types::pipeline::{ArtifactType, Pipeline};
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};
use tracing::instrument;

use crate::handler::{Handler, HandlerContext};

/// `partition` (spec §4.3): token-bounded splits with configurable overlap. `text-splitter`
/// already tries semantic separators in order (paragraph, sentence, clause, word, char) and
/// falls back, matching the spec's chunker requirement.
pub struct PartitionHandler;

#[async_trait]
impl Handler for PartitionHandler {
    fn name(&self) -> &'static str {
        "partition"
    }

    #[instrument(skip(self, pipeline, ctx))]
    async fn handle(&self, pipeline: &Pipeline, ctx: &HandlerContext) -> Outcome<Pipeline> {
        let mut next = pipeline.clone();

        for file_idx in 0..next.files.len() {
            let already_partitioned = next.files[file_idx]
                .generated_files
                .iter()
                .any(|g| g.artifact_type == ArtifactType::TextPartition);
            if already_partitioned {
                continue;
            }

            let Some(text_artifact) = next.files[file_idx]
                .generated_files
                .iter()
                .find(|g| g.artifact_type == ArtifactType::Text)
                .cloned()
            else {
                continue;
            };

            let text = match ctx.storage.get(&text_artifact.blob_location).await {
                Ok(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(err) => return Outcome::Permanent(err.to_string()),
                },
                Err(err) => return Outcome::Transient(err.to_string()),
            };

            let chunks = match chunk_text(&text, ctx.chunk_min_tokens, ctx.chunk_max_tokens, ctx.chunk_overlap_tokens) {
                Ok(chunks) => chunks,
                Err(err) => return Outcome::Permanent(err.to_string()),
            };

            for (seq, chunk) in chunks.into_iter().enumerate() {
                let location = format!("{}/{}/{}.partition.{seq}.txt", next.index, next.document_id, next.files[file_idx].id);
                if let Err(err) = ctx.storage.put(&location, chunk.into()).await {
                    return Outcome::Transient(err.to_string());
                }
                next.files[file_idx].push_generated(format!("partition-{seq}"), ArtifactType::TextPartition, location);
            }
        }

        Outcome::Success(next)
    }
}

fn chunk_text(text: &str, min_tokens: usize, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<String>, AppError> {
    if min_tokens == 0 || max_tokens == 0 || min_tokens > max_tokens {
        return Err(AppError::Configuration("invalid chunk token bounds; ensure 0 < min <= max".into()));
    }
    if overlap_tokens >= min_tokens {
        return Err(AppError::Configuration(format!(
            "chunk overlap {overlap_tokens} must be smaller than the minimum chunk size {min_tokens}"
        )));
    }

    let capacity = ChunkCapacity::new(min_tokens)
        .with_max(max_tokens)
        .map_err(|e| AppError::Configuration(format!("invalid chunk capacity: {e}")))?;

    let chunks: Vec<String> = match common::utils::tokenizer::shared_tokenizer() {
        Some(tokenizer) => {
            let config = ChunkConfig::new(capacity)
                .with_overlap(overlap_tokens)
                .map_err(|e| AppError::Configuration(format!("invalid chunk overlap: {e}")))?
                .with_sizer(tokenizer);
            TextSplitter::new(config).chunks(text).map(str::to_owned).collect()
        }
        None => {
            let config = ChunkConfig::new(capacity)
                .with_overlap(overlap_tokens)
                .map_err(|e| AppError::Configuration(format!("invalid chunk overlap: {e}")))?;
            TextSplitter::new(config).chunks(text).map(str::to_owned).collect()
        }
    };

    if chunks.is_empty() {
        return Ok(vec![text.to_string()]);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_text_rejects_overlap_ge_min() {
        let err = chunk_text("hello world", 4, 8, 4);
        assert!(matches!(err, Err(AppError::Configuration(_))));
    }

    #[test]
    fn chunk_text_splits_long_input() {
        let text = "one two three. ".repeat(50);
        let chunks = chunk_text(&text, 8, 16, 2).expect("chunks");
        assert!(chunks.len() > 1);
    }

    #[test]
    fn chunk_text_handles_empty_input() {
        let chunks = chunk_text("", 8, 16, 2).expect("chunks");
        assert_eq!(chunks, vec![String::new()]);
    }
}
