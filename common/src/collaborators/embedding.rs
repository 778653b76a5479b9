use async_openai::config::OpenAIConfig;
use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::Client;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::utils::tokenizer::count_tokens;

/// Embedding generator collaborator (spec §6: "Embedding generator collaborator (in)").
/// Multiple may be registered; `gen_embeddings` fans out across every configured one and
/// records which generator and model produced each vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize {
        count_tokens(text)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;

    fn max_tokens(&self) -> usize;

    /// Identifies this generator+model for the `MemoryRecord` payload (spec §3: "records
    /// which generator and model produced each vector").
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;
}

/// OpenAI-backed embedding generator.
pub struct OpenAiEmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: u32,
    max_tokens: usize,
}

impl OpenAiEmbeddingProvider {
    #[must_use]
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>, dimensions: u32) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
            max_tokens: 8191,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions)
            .input([text])
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::PermanentIo("no embedding data received from API".into()))?
            .embedding;

        if embedding.len() != self.dimensions as usize {
            return Err(AppError::PermanentIo(format!(
                "embedding generator returned dimension {} but {} was expected",
                embedding.len(),
                self.dimensions
            )));
        }

        Ok(embedding)
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions as usize
    }
}

/// Deterministic embedding provider for tests: hashes the input into a unit vector of the
/// configured dimension. No network calls, so unit/integration tests stay hermetic.
pub struct HashedEmbeddingProvider {
    dimensions: usize,
    model: String,
}

impl HashedEmbeddingProvider {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model: "hashed-test-embedding".to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vector = Vec::with_capacity(self.dimensions);
        let mut seed = text.as_bytes().to_vec();
        while vector.len() < self.dimensions {
            let digest = Sha256::digest(&seed);
            for byte in &digest {
                if vector.len() >= self.dimensions {
                    break;
                }
                vector.push((f32::from(*byte) / 255.0) * 2.0 - 1.0);
            }
            seed = digest.to_vec();
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn max_tokens(&self) -> usize {
        8191
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_provider_is_deterministic() {
        let provider = HashedEmbeddingProvider::new(8);
        let a = provider.embed("hello world").await.expect("embed");
        let b = provider.embed("hello world").await.expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn hashed_provider_differs_per_input() {
        let provider = HashedEmbeddingProvider::new(8);
        let a = provider.embed("alpha").await.expect("embed");
        let b = provider.embed("beta").await.expect("embed");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn hashed_provider_is_unit_norm() {
        let provider = HashedEmbeddingProvider::new(16);
        let v = provider.embed("normalize me").await.expect("embed");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
