use async_trait::async_trait;
use common::error::Outcome;
use common::storage::types::pipeline::Pipeline;
use tracing::instrument;

use crate::handler::{Handler, HandlerContext};

/// `delete_document` (spec §4.3, §6): removes every blob artifact and every vector record
/// belonging to one document. Record ids are re-derived from the vector index rather than
/// from `saved_memory_record_ids`, since a deletion-only pipeline never ran
/// `save_embeddings` and so never populated that list.
pub struct DeleteDocumentHandler;

#[async_trait]
impl Handler for DeleteDocumentHandler {
    fn name(&self) -> &'static str {
        "delete_document"
    }

    #[instrument(skip(self, pipeline, ctx))]
    async fn handle(&self, pipeline: &Pipeline, ctx: &HandlerContext) -> Outcome<Pipeline> {
        let next = pipeline.clone();

        let record_ids = match ctx.vector_index.list_ids_for_document(&next.index, &next.document_id).await {
            Ok(ids) => ids,
            Err(err) => return Outcome::Transient(err.to_string()),
        };

        for record_id in record_ids {
            if let Err(err) = ctx.write_engine.delete(&record_id).await {
                return Outcome::Transient(err.to_string());
            }
        }

        let prefix = format!("{}/{}", next.index, next.document_id);
        if let Err(err) = ctx.storage.delete_prefix(&prefix).await {
            return Outcome::Transient(err.to_string());
        }

        Outcome::Success(next)
    }
}
