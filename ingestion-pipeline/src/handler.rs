use std::sync::Arc;

use async_trait::async_trait;
use common::collaborators::decoder::DecoderRegistry;
use common::collaborators::embedding::EmbeddingProvider;
use common::collaborators::generator::TextGenerator;
use common::error::Outcome;
use common::storage::blob::StorageManager;
use common::storage::types::pipeline::Pipeline;
use retrieval_pipeline::VectorIndex;
use write_engine::WriteEngine;

/// Shared collaborators every handler may need (spec §6 external collaborators, §4.3).
/// Built once by `km-builder` (C10) and handed to every handler invocation.
pub struct HandlerContext {
    pub storage: StorageManager,
    pub decoders: Arc<DecoderRegistry>,
    pub embedding_providers: Vec<Arc<dyn EmbeddingProvider>>,
    pub generator: Arc<dyn TextGenerator>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub write_engine: Arc<WriteEngine>,
    pub chunk_min_tokens: usize,
    pub chunk_max_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

/// A single unit of pipeline work, named by the wire contract in spec §4.3. Handlers treat
/// the input as read-only except via the returned copy (spec §4.3: "must treat the input as
/// read-only except via the returned copy").
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, pipeline: &Pipeline, ctx: &HandlerContext) -> Outcome<Pipeline>;
}
