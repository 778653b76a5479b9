use async_trait::async_trait;
use common::error::Outcome;
use common::storage::types::pipeline::Pipeline;
use tracing::instrument;

use crate::handler::{Handler, HandlerContext};

/// Batch size used while draining a whole index prior to removal; kept small so a single
/// `delete_index` call doesn't hold one giant result set in memory.
const DRAIN_BATCH_LIMIT: usize = 500;

/// `delete_index` (spec §4.3, §4.6, §6): removes every vector record in a named index, the
/// index collection itself (a no-op for the reserved `default` index), and every blob object
/// stored under that index prefix.
pub struct DeleteIndexHandler;

#[async_trait]
impl Handler for DeleteIndexHandler {
    fn name(&self) -> &'static str {
        "delete_index"
    }

    #[instrument(skip(self, pipeline, ctx))]
    async fn handle(&self, pipeline: &Pipeline, ctx: &HandlerContext) -> Outcome<Pipeline> {
        let next = pipeline.clone();

        loop {
            let batch = match ctx.vector_index.get_list(&next.index, &[], DRAIN_BATCH_LIMIT).await {
                Ok(batch) => batch,
                Err(err) => return Outcome::Transient(err.to_string()),
            };
            if batch.is_empty() {
                break;
            }

            for record in &batch {
                if let Err(err) = ctx.write_engine.delete(&record.id).await {
                    return Outcome::Transient(err.to_string());
                }
            }

            if batch.len() < DRAIN_BATCH_LIMIT {
                break;
            }
        }

        if let Err(err) = ctx.vector_index.delete_index(&next.index).await {
            return Outcome::Transient(err.to_string());
        }

        if let Err(err) = ctx.storage.delete_prefix(&next.index).await {
            return Outcome::Transient(err.to_string());
        }

        Outcome::Success(next)
    }
}
