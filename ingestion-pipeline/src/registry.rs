use std::collections::HashMap;
use std::sync::Arc;

use crate::handler::Handler;
use crate::handlers::delete_document::DeleteDocumentHandler;
use crate::handlers::delete_index::DeleteIndexHandler;
use crate::handlers::extract::ExtractHandler;
use crate::handlers::gen_embeddings::GenEmbeddingsHandler;
use crate::handlers::partition::PartitionHandler;
use crate::handlers::save_embeddings::SaveEmbeddingsHandler;
use crate::handlers::summarize::SummarizeHandler;

/// Handler Registry (C5, spec §4.3): maps a pipeline step name to the handler that runs it.
/// The orchestrator never hardcodes step names beyond looking one up here.
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(handler.name(), handler);
        self
    }

    #[must_use]
    pub fn get(&self, step: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(step).cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(ExtractHandler))
            .register(Arc::new(PartitionHandler))
            .register(Arc::new(SummarizeHandler))
            .register(Arc::new(GenEmbeddingsHandler))
            .register(Arc::new(SaveEmbeddingsHandler))
            .register(Arc::new(DeleteDocumentHandler))
            .register(Arc::new(DeleteIndexHandler));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_every_canonical_step() {
        let registry = HandlerRegistry::default();
        for step in [
            "extract",
            "partition",
            "summarize",
            "gen_embeddings",
            "save_embeddings",
            "delete_document",
            "delete_index",
        ] {
            assert!(registry.get(step).is_some(), "missing handler for '{step}'");
        }
    }

    #[test]
    fn unknown_step_resolves_to_none() {
        let registry = HandlerRegistry::default();
        assert!(registry.get("unknown").is_none());
    }
}
