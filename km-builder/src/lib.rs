#![allow(clippy::missing_docs_in_private_items)]

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use common::collaborators::decoder::{DecoderRegistry, PlainTextDecoder};
use common::collaborators::embedding::{EmbeddingProvider, OpenAiEmbeddingProvider};
use common::collaborators::generator::{OpenAiTextGenerator, TextGenerator};
use common::error::AppError;
use common::storage::blob::StorageManager;
use common::storage::db::SurrealDbClient;
use common::utils::config::{AppConfig, OrchestrationKind, VectorKind};
use ingestion_pipeline::{DistributedOrchestrator, HandlerContext, HandlerRegistry, InProcessOrchestrator};
use queue::driver::{LocalFileQueue, MessageQueue};
use retrieval_pipeline::{InMemoryVectorIndex, SearchClient, SurrealVectorIndex, VectorIndex, VectorIndexSecondaryIndex, DEFAULT_INDEX};
use write_engine::WriteEngine;

/// Selects which C6 orchestrator drives pipelines, per `config.orchestration` (spec §6).
pub enum Orchestrator {
    InProcess(Arc<InProcessOrchestrator>),
    Distributed(Arc<DistributedOrchestrator>),
}

/// Wires every collaborator named in spec §6 from a validated `AppConfig`. This is the
/// single place that knows how to build a concrete driver for each trait; handlers and the
/// orchestrator only ever see the traits.
pub struct Services {
    pub config: AppConfig,
    pub db: Arc<SurrealDbClient>,
    pub storage: StorageManager,
    pub queue: Arc<dyn MessageQueue>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub write_engine: Arc<WriteEngine>,
    pub handler_ctx: Arc<HandlerContext>,
    pub registry: Arc<HandlerRegistry>,
    pub search_client: Arc<SearchClient>,
    pub orchestrator: Orchestrator,
}

impl Services {
    /// Build every collaborator, failing fast on missing or invalid configuration rather
    /// than surfacing a wiring mistake later as a runtime error (spec §9 Design Note:
    /// "Dynamic container registration").
    pub async fn build(config: AppConfig) -> Result<Self, AppError> {
        config.validate()?;

        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        db.ensure_initialized(config.embedding_dimensions as usize).await?;

        let storage = StorageManager::new(&config).await?;

        let openai_client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        );

        let embedding_provider: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbeddingProvider::new(
            openai_client.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        ));
        let generator: Arc<dyn TextGenerator> = Arc::new(OpenAiTextGenerator::new(
            openai_client,
            config.generator_model.clone(),
            config.generator_max_tokens as usize,
        ));

        let vector_index: Arc<dyn VectorIndex> = match config.vector {
            VectorKind::Surreal => Arc::new(SurrealVectorIndex::new(db.clone())),
            VectorKind::LocalFile => InMemoryVectorIndex::shared(),
        };
        vector_index
            .create_index(DEFAULT_INDEX, config.embedding_dimensions as usize)
            .await?;

        let memory_record_index = VectorIndexSecondaryIndex::new("memory_record_index", vector_index.clone());
        let write_engine = Arc::new(WriteEngine::new(db.clone(), vec![Arc::new(memory_record_index)]));

        let queue: Arc<dyn MessageQueue> = Arc::new(LocalFileQueue::new(config.retry.clone()));

        let decoders = Arc::new(DecoderRegistry::new().register(Box::new(PlainTextDecoder)));

        let handler_ctx = Arc::new(HandlerContext {
            storage: storage.clone(),
            decoders,
            embedding_providers: vec![embedding_provider.clone()],
            generator: generator.clone(),
            vector_index: vector_index.clone(),
            write_engine: write_engine.clone(),
            chunk_min_tokens: config.chunk_min_tokens,
            chunk_max_tokens: config.chunk_max_tokens,
            chunk_overlap_tokens: config.chunk_overlap_tokens,
        });

        let registry = Arc::new(HandlerRegistry::default());

        let orchestrator = match config.orchestration {
            OrchestrationKind::InProcess => Orchestrator::InProcess(Arc::new(InProcessOrchestrator::new(
                db.clone(),
                registry.clone(),
                handler_ctx.clone(),
            ))),
            OrchestrationKind::Distributed => Orchestrator::Distributed(Arc::new(DistributedOrchestrator::new(
                queue.clone(),
                db.clone(),
                registry.clone(),
                handler_ctx.clone(),
            ))),
        };

        let search_client = Arc::new(SearchClient::new(vector_index.clone(), embedding_provider, generator));

        Ok(Self {
            config,
            db,
            storage,
            queue,
            vector_index,
            write_engine,
            handler_ctx,
            registry,
            search_client,
            orchestrator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::config::test_config_memory;

    #[tokio::test]
    async fn build_wires_every_collaborator_for_in_process_config() {
        let services = Services::build(test_config_memory()).await.expect("build");
        assert!(matches!(services.orchestrator, Orchestrator::InProcess(_)));
    }

    #[tokio::test]
    async fn build_selects_distributed_orchestrator_when_configured() {
        let mut config = test_config_memory();
        config.orchestration = OrchestrationKind::Distributed;
        let services = Services::build(config).await.expect("build");
        assert!(matches!(services.orchestrator, Orchestrator::Distributed(_)));
    }
}
