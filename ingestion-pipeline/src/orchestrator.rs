use std::sync::Arc;
use std::time::Duration;

use common::error::{AppError, Outcome};
use common::storage::db::SurrealDbClient;
use common::storage::types::pipeline::Pipeline;
use queue::driver::MessageQueue;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::handler::HandlerContext;
use crate::registry::HandlerRegistry;

/// Transient-failure retries attempted per step before a pipeline is poisoned (spec §4.4:
/// "a bounded number of attempts with back-off, then Poisoned").
const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Base and cap for the exponential back-off between transient retries, grounded in the
/// teacher's `retry_delay` (doubling per attempt, capped).
const RETRY_BASE_SECS: u64 = 1;
const RETRY_CAP_SECS: u64 = 30;

fn retry_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(5);
    let secs = RETRY_BASE_SECS.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_secs(secs.min(RETRY_CAP_SECS))
}

/// C6 Orchestrator, in-process variant (spec §4.4): drives a pipeline to completion on the
/// calling task, persisting the manifest between every step so a crash mid-run resumes from
/// the last completed step on the next `submit`.
pub struct InProcessOrchestrator {
    db: Arc<SurrealDbClient>,
    registry: Arc<HandlerRegistry>,
    ctx: Arc<HandlerContext>,
}

impl InProcessOrchestrator {
    #[must_use]
    pub fn new(db: Arc<SurrealDbClient>, registry: Arc<HandlerRegistry>, ctx: Arc<HandlerContext>) -> Self {
        Self { db, registry, ctx }
    }

    /// Persist the manifest, then run every remaining step to completion, failure, or
    /// cancellation (spec §4.4). Returns the final pipeline state either way except on a
    /// storage error.
    #[instrument(skip(self, pipeline), fields(document_id = %pipeline.document_id))]
    pub async fn submit(&self, mut pipeline: Pipeline) -> Result<Pipeline, AppError> {
        self.db.store_item(pipeline.clone()).await?;

        loop {
            if pipeline.cancelled {
                info!(document_id = %pipeline.document_id, "pipeline cancelled before completion");
                return Ok(pipeline);
            }
            let Some(step_name) = pipeline.next_step().map(str::to_string) else {
                break;
            };

            let Some(handler) = self.registry.get(&step_name) else {
                pipeline.mark_poisoned(format!("no handler registered for step '{step_name}'"));
                self.db.upsert_item(pipeline.clone()).await?;
                return Err(AppError::Configuration(format!("unknown pipeline step '{step_name}'")));
            };

            pipeline.mark_processing();
            self.db.upsert_item(pipeline.clone()).await?;

            let mut attempt = 1;
            loop {
                match handler.handle(&pipeline, &self.ctx).await {
                    Outcome::Success(mut next) => {
                        next.advance()?;
                        self.db.upsert_item(next.clone()).await?;
                        pipeline = next;
                        break;
                    }
                    Outcome::Transient(reason) => {
                        if attempt >= MAX_TRANSIENT_RETRIES {
                            pipeline.mark_poisoned(reason.clone());
                            self.db.upsert_item(pipeline.clone()).await?;
                            warn!(document_id = %pipeline.document_id, step = %step_name, reason, "step exhausted retries; pipeline poisoned");
                            return Err(AppError::PermanentIo(reason));
                        }
                        warn!(document_id = %pipeline.document_id, step = %step_name, attempt, reason, "transient step failure; retrying");
                        tokio::time::sleep(retry_delay(attempt)).await;
                        attempt += 1;
                    }
                    Outcome::Permanent(reason) => {
                        pipeline.mark_poisoned(reason.clone());
                        self.db.upsert_item(pipeline.clone()).await?;
                        return Err(AppError::PermanentIo(reason));
                    }
                    Outcome::Cancelled => {
                        pipeline.mark_cancelled();
                        self.db.upsert_item(pipeline.clone()).await?;
                        return Ok(pipeline);
                    }
                }
            }
        }

        Ok(pipeline)
    }
}

/// The wire payload enqueued per step (spec §4.4 distributed variant): names the pipeline,
/// the step to run, and the `execution_id` the pipeline carried when this message was
/// enqueued, so a worker can recognize a stale/superseded message and drop it.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StepMessage {
    pipeline_id: String,
    execution_id: String,
    step: String,
}

fn queue_name_for_step(step: &str) -> String {
    format!("km-{step}")
}

/// C6 Orchestrator, distributed variant (spec §4.4): `submit` enqueues one message for the
/// next step; a worker loop per step dequeues, validates the message is still current
/// against the persisted manifest, runs the handler, and either enqueues the next step's
/// message or nacks/poisons.
pub struct DistributedOrchestrator {
    queue: Arc<dyn MessageQueue>,
    db: Arc<SurrealDbClient>,
    registry: Arc<HandlerRegistry>,
    ctx: Arc<HandlerContext>,
}

impl DistributedOrchestrator {
    #[must_use]
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        db: Arc<SurrealDbClient>,
        registry: Arc<HandlerRegistry>,
        ctx: Arc<HandlerContext>,
    ) -> Self {
        Self { queue, db, registry, ctx }
    }

    #[instrument(skip(self, pipeline), fields(document_id = %pipeline.document_id))]
    pub async fn submit(&self, pipeline: Pipeline) -> Result<(), AppError> {
        self.db.store_item(pipeline.clone()).await?;
        if let Some(step) = pipeline.next_step() {
            self.enqueue_step(&pipeline, step).await?;
        }
        Ok(())
    }

    async fn enqueue_step(&self, pipeline: &Pipeline, step: &str) -> Result<(), AppError> {
        let queue_name = queue_name_for_step(step);
        self.queue.connect(&queue_name).await?;
        let message = StepMessage {
            pipeline_id: pipeline.id.clone(),
            execution_id: pipeline.execution_id.clone(),
            step: step.to_string(),
        };
        let payload = serde_json::to_vec(&message).map_err(|err| AppError::PermanentIo(err.to_string()))?;
        self.queue.enqueue(&queue_name, payload).await
    }

    /// Dequeue and process up to `batch_size` messages for `step`, returning how many were
    /// processed (0 means the queue was empty; callers poll again after a delay).
    #[instrument(skip(self))]
    pub async fn run_once(&self, step: &str, batch_size: u32) -> Result<usize, AppError> {
        let queue_name = queue_name_for_step(step);
        let deliveries = self.queue.dequeue_batch(&queue_name, batch_size).await?;
        let count = deliveries.len();
        for delivery in deliveries {
            let message_id = delivery.message_id.clone();
            let dequeue_count = delivery.dequeue_count;
            match self.process_delivery(step, &queue_name, delivery).await {
                Ok(()) => {}
                Err(err) => {
                    warn!(step, error = %err, "worker failed to process delivery; nacking");
                    self.queue
                        .nack(&queue_name, &message_id, Duration::from_secs(u64::from(dequeue_count)))
                        .await?;
                }
            }
        }
        Ok(count)
    }

    async fn process_delivery(
        &self,
        step: &str,
        queue_name: &str,
        delivery: queue::message::Delivery,
    ) -> Result<(), AppError> {
        let message: StepMessage =
            serde_json::from_slice(&delivery.payload).map_err(|err| AppError::PermanentIo(err.to_string()))?;

        let Some(pipeline): Option<Pipeline> = self.db.get_item(&message.pipeline_id).await? else {
            info!(pipeline_id = %message.pipeline_id, "pipeline no longer exists; dropping message");
            return self.queue.ack(queue_name, &delivery.message_id).await;
        };

        let is_current = !pipeline.cancelled && pipeline.execution_id == message.execution_id && pipeline.next_step() == Some(step);
        if !is_current {
            info!(pipeline_id = %pipeline.id, step, "stale or superseded step message; dropping");
            return self.queue.ack(queue_name, &delivery.message_id).await;
        }

        let Some(handler) = self.registry.get(step) else {
            let mut poisoned = pipeline;
            poisoned.mark_poisoned(format!("no handler registered for step '{step}'"));
            self.db.upsert_item(poisoned).await?;
            return self.queue.ack(queue_name, &delivery.message_id).await;
        };

        match handler.handle(&pipeline, &self.ctx).await {
            Outcome::Success(mut next) => {
                next.advance()?;
                self.db.upsert_item(next.clone()).await?;
                if let Some(next_step) = next.next_step() {
                    self.enqueue_step(&next, next_step).await?;
                }
                self.queue.ack(queue_name, &delivery.message_id).await
            }
            Outcome::Transient(reason) => {
                let delay = Duration::from_secs(u64::from(delivery.dequeue_count));
                warn!(pipeline_id = %pipeline.id, step, reason, "transient step failure; nacking");
                self.queue.nack(queue_name, &delivery.message_id, delay).await
            }
            Outcome::Permanent(reason) => {
                let mut poisoned = pipeline;
                poisoned.mark_poisoned(reason);
                self.db.upsert_item(poisoned).await?;
                self.queue.ack(queue_name, &delivery.message_id).await
            }
            Outcome::Cancelled => {
                let mut cancelled = pipeline;
                cancelled.mark_cancelled();
                self.db.upsert_item(cancelled).await?;
                self.queue.ack(queue_name, &delivery.message_id).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::extract::ExtractHandler;
    use common::collaborators::decoder::DecoderRegistry;
    use common::collaborators::embedding::HashedEmbeddingProvider;
    use common::collaborators::generator::EchoTextGenerator;
    use common::storage::blob::StorageManager;
    use common::storage::types::pipeline::{ArtifactType, PipelineFile};
    use common::tags::TagSet;
    use common::utils::config::test_config_memory;
    use object_store::memory::InMemory;
    use retrieval_pipeline::InMemoryVectorIndex;
    use write_engine::WriteEngine;

    async fn test_ctx() -> Arc<HandlerContext> {
        let cfg = test_config_memory();
        let storage = StorageManager::with_backend(Arc::new(InMemory::new()), cfg.storage.clone());
        let db = Arc::new(SurrealDbClient::memory("orch", &uuid::Uuid::new_v4().to_string()).await.expect("db"));
        Arc::new(HandlerContext {
            storage,
            decoders: Arc::new(DecoderRegistry::new().register(Box::new(common::collaborators::decoder::PlainTextDecoder))),
            embedding_providers: vec![Arc::new(HashedEmbeddingProvider::new(8))],
            generator: Arc::new(EchoTextGenerator::new(4096)),
            vector_index: InMemoryVectorIndex::shared(),
            write_engine: Arc::new(WriteEngine::new(db, vec![])),
            chunk_min_tokens: 8,
            chunk_max_tokens: 64,
            chunk_overlap_tokens: 2,
        })
    }

    fn registry_with_extract_only() -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(ExtractHandler));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn in_process_orchestrator_runs_single_step_pipeline_to_completion() {
        let ctx = test_ctx().await;
        ctx.storage.put("default/doc1/a.txt", b"hello world".to_vec().into()).await.expect("put");
        let db = Arc::new(SurrealDbClient::memory("orch_run", &uuid::Uuid::new_v4().to_string()).await.expect("db"));

        let mut file = PipelineFile::new("f1", "a.txt", "text/plain", "default/doc1/a.txt");
        file.artifact_type = ArtifactType::Undefined;
        let pipeline = Pipeline::new("default", "doc1", vec!["extract".to_string()], TagSet::new(), vec![file]);

        let orchestrator = InProcessOrchestrator::new(db, registry_with_extract_only(), ctx);
        let finished = orchestrator.submit(pipeline).await.expect("submit");
        assert!(finished.is_ready());
        assert!(finished.files[0].generated_files.iter().any(|g| g.artifact_type == ArtifactType::Text));
    }

    #[tokio::test]
    async fn in_process_orchestrator_poisons_on_unknown_step() {
        let ctx = test_ctx().await;
        let db = Arc::new(SurrealDbClient::memory("orch_unknown", &uuid::Uuid::new_v4().to_string()).await.expect("db"));
        let pipeline = Pipeline::new("default", "doc1", vec!["does-not-exist".to_string()], TagSet::new(), vec![]);

        let orchestrator = InProcessOrchestrator::new(db, Arc::new(HandlerRegistry::new()), ctx);
        let result = orchestrator.submit(pipeline).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn distributed_orchestrator_enqueues_and_runs_worker_to_completion() {
        let ctx = test_ctx().await;
        ctx.storage.put("default/doc1/a.txt", b"hello world".to_vec().into()).await.expect("put");
        let db = Arc::new(SurrealDbClient::memory("orch_dist", &uuid::Uuid::new_v4().to_string()).await.expect("db"));
        let queue: Arc<dyn MessageQueue> = Arc::new(queue::driver::LocalFileQueue::new(common::utils::config::RetryConfig::default()));

        let mut file = PipelineFile::new("f1", "a.txt", "text/plain", "default/doc1/a.txt");
        file.artifact_type = ArtifactType::Undefined;
        let pipeline = Pipeline::new("default", "doc1", vec!["extract".to_string()], TagSet::new(), vec![file]);

        let orchestrator = DistributedOrchestrator::new(queue, db.clone(), registry_with_extract_only(), ctx);
        orchestrator.submit(pipeline.clone()).await.expect("submit");

        let processed = orchestrator.run_once("extract", 10).await.expect("run_once");
        assert_eq!(processed, 1);

        let stored: Pipeline = db.get_item(&pipeline.id).await.expect("get").expect("present");
        assert!(stored.is_ready());
    }

    #[tokio::test]
    async fn distributed_orchestrator_drops_stale_message_after_resubmission() {
        let ctx = test_ctx().await;
        let db = Arc::new(SurrealDbClient::memory("orch_stale", &uuid::Uuid::new_v4().to_string()).await.expect("db"));
        let queue: Arc<dyn MessageQueue> = Arc::new(queue::driver::LocalFileQueue::new(common::utils::config::RetryConfig::default()));

        let pipeline = Pipeline::new("default", "doc1", vec!["extract".to_string()], TagSet::new(), vec![]);
        let orchestrator = DistributedOrchestrator::new(queue, db.clone(), registry_with_extract_only(), ctx);
        orchestrator.submit(pipeline.clone()).await.expect("first submit");

        let mut resubmitted = pipeline.clone();
        resubmitted.mark_processing();
        db.upsert_item(resubmitted).await.expect("bump execution id");

        let processed = orchestrator.run_once("extract", 10).await.expect("run_once");
        assert_eq!(processed, 1, "stale message should still be dequeued and acked");
    }
}
