use async_trait::async_trait;
use common::error::{AppError, Outcome};
use common::storage::types::pipeline::{ArtifactType, Pipeline};
use tracing::instrument;

use crate::handler::{Handler, HandlerContext};

/// `extract` (spec §4.3): dispatches on mime, decodes raw file bytes into text, and appends
/// one `Text` generated artifact per source file. Advisory-idempotent: a file that already
/// has a `Text` child is skipped.
pub struct ExtractHandler;

#[async_trait]
impl Handler for ExtractHandler {
    fn name(&self) -> &'static str {
        "extract"
    }

    #[instrument(skip(self, pipeline, ctx))]
    async fn handle(&self, pipeline: &Pipeline, ctx: &HandlerContext) -> Outcome<Pipeline> {
        let mut next = pipeline.clone();

        for file in &mut next.files {
            if file
                .generated_files
                .iter()
                .any(|g| g.artifact_type == ArtifactType::Text)
            {
                continue;
            }

            let bytes = match ctx.storage.get(&file.blob_location).await {
                Ok(bytes) => bytes,
                Err(err) => return Outcome::Transient(err.to_string()),
            };

            let decoded = match ctx.decoders.decode(&bytes, &file.mime).await {
                Ok(content) => content,
                Err(err @ AppError::PermanentIo(_)) => return Outcome::Permanent(err.to_string()),
                Err(err) => return Outcome::Transient(err.to_string()),
            };

            let location = format!("{}/{}/{}.extract.0.txt", next.index, next.document_id, file.id);
            if let Err(err) = ctx.storage.put(&location, decoded.full_text().into()).await {
                return Outcome::Transient(err.to_string());
            }

            file.push_generated("extracted-text", ArtifactType::Text, location);
        }

        Outcome::Success(next)
    }
}
