use async_trait::async_trait;
use common::collaborators::generator::GenerationOptions;
use common::error::Outcome;
use common::storage::types::pipeline::{ArtifactType, Pipeline};
use futures::StreamExt;
use tracing::instrument;

use crate::handler::{Handler, HandlerContext};

/// `summarize` (spec §4.3, optional step): generates one synthetic summary artifact per
/// file, tagged `synthetic=summary`, from the concatenation of its partitions.
pub struct SummarizeHandler;

#[async_trait]
impl Handler for SummarizeHandler {
    fn name(&self) -> &'static str {
        "summarize"
    }

    #[instrument(skip(self, pipeline, ctx))]
    async fn handle(&self, pipeline: &Pipeline, ctx: &HandlerContext) -> Outcome<Pipeline> {
        let mut next = pipeline.clone();

        for file_idx in 0..next.files.len() {
            if next.files[file_idx]
                .generated_files
                .iter()
                .any(|g| g.artifact_type == ArtifactType::SyntheticData)
            {
                continue;
            }

            let partitions: Vec<_> = next.files[file_idx]
                .generated_files
                .iter()
                .filter(|g| g.artifact_type == ArtifactType::TextPartition)
                .cloned()
                .collect();
            if partitions.is_empty() {
                continue;
            }

            let mut combined = String::new();
            for partition in &partitions {
                match ctx.storage.get(&partition.blob_location).await {
                    Ok(bytes) => combined.push_str(&String::from_utf8_lossy(&bytes)),
                    Err(err) => return Outcome::Transient(err.to_string()),
                }
                combined.push('\n');
            }

            let prompt = format!("Summarize the following text in a few sentences:\n\n{combined}");
            let mut stream = match ctx.generator.generate(&prompt, GenerationOptions::default()).await {
                Ok(stream) => stream,
                Err(err) => return Outcome::Transient(err.to_string()),
            };

            let mut summary = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(token) => summary.push_str(&token),
                    Err(err) => return Outcome::Transient(err.to_string()),
                }
            }

            let location = format!(
                "{}/{}/{}.summary.0.txt",
                next.index, next.document_id, next.files[file_idx].id
            );
            if let Err(err) = ctx.storage.put(&location, summary.into()).await {
                return Outcome::Transient(err.to_string());
            }
            next.files[file_idx].push_generated("summary", ArtifactType::SyntheticData, location);
        }

        Outcome::Success(next)
    }
}
