use std::pin::Pin;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::error::AppError;
use crate::utils::tokenizer::count_tokens;

/// Generation options (spec §6: "Text generator collaborator (in)").
#[derive(Clone, Debug)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub nucleus_sampling: f32,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.0,
            nucleus_sampling: 1.0,
            stop_sequences: Vec::new(),
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

/// Text generator collaborator: `generate(prompt, options) -> stream<string>` (spec §6).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, options: GenerationOptions) -> Result<TokenStream, AppError>;

    fn count_tokens(&self, text: &str) -> usize {
        count_tokens(text)
    }

    fn max_tokens(&self) -> usize;
}

/// OpenAI chat-completion-backed generator, streaming token deltas.
pub struct OpenAiTextGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: usize,
}

impl OpenAiTextGenerator {
    #[must_use]
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn generate(&self, prompt: &str, options: GenerationOptions) -> Result<TokenStream, AppError> {
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(vec![user_message.into()])
            .max_tokens(options.max_tokens)
            .temperature(options.temperature)
            .top_p(options.nucleus_sampling)
            .stream(true);
        if !options.stop_sequences.is_empty() {
            builder.stop(options.stop_sequences.clone());
        }
        let request = builder.build()?;

        let mut openai_stream = self.client.chat().create_stream(request).await?;

        let token_stream = stream! {
            while let Some(next) = openai_stream.next().await {
                match next {
                    Ok(response) => {
                        for choice in response.choices {
                            if let Some(content) = choice.delta.content {
                                yield Ok(content);
                            }
                        }
                    }
                    Err(err) => yield Err(AppError::from(err)),
                }
            }
        };

        Ok(Box::pin(token_stream))
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}

/// Deterministic generator for tests: echoes a fixed answer token-by-token, no network calls.
pub struct EchoTextGenerator {
    max_tokens: usize,
}

impl EchoTextGenerator {
    #[must_use]
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

#[async_trait]
impl TextGenerator for EchoTextGenerator {
    async fn generate(&self, prompt: &str, _options: GenerationOptions) -> Result<TokenStream, AppError> {
        let words: Vec<String> = prompt.split_whitespace().map(String::from).collect();
        let token_stream = stream! {
            for word in words {
                yield Ok(format!("{word} "));
            }
        };
        Ok(Box::pin(token_stream))
    }

    fn max_tokens(&self) -> usize {
        self.max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn echo_generator_streams_prompt_words() {
        let generator = EchoTextGenerator::new(100);
        let stream = generator
            .generate("Facts:\nQuestion: what?", GenerationOptions::default())
            .await
            .expect("generate");
        let tokens: Vec<String> = stream.try_collect().await.expect("collect");
        assert!(!tokens.is_empty());
    }
}
