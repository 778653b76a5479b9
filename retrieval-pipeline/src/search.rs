use std::sync::Arc;

use common::collaborators::embedding::EmbeddingProvider;
use common::collaborators::generator::{GenerationOptions, TextGenerator};
use common::error::AppError;
use common::tags::TagFilter;
use futures::StreamExt;
use tracing::instrument;

use crate::vector_index::VectorIndex;

/// Sentinel answer returned when the assembled facts block is empty (spec §4.7).
pub const INFO_NOT_FOUND: &str = "INFO NOT FOUND";

/// One partition surfaced to the caller as supporting evidence for an answer (spec §4.7,
/// §6 "relevant_sources[]").
#[derive(Clone, Debug)]
pub struct RelevantSource {
    pub document_id: String,
    pub file_name: String,
    pub text: String,
    pub relevance: f32,
}

#[derive(Clone, Debug)]
pub struct AskResult {
    pub question: String,
    pub answer: String,
    pub no_result: bool,
    pub relevant_sources: Vec<RelevantSource>,
}

/// Search Client (C9, spec §4.7). Embeds the question, fans out to one vector index
/// collection, assembles a token-budgeted facts block, and streams the generator's answer.
pub struct SearchClient {
    vector_index: Arc<dyn VectorIndex>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn TextGenerator>,
}

impl SearchClient {
    #[must_use]
    pub fn new(
        vector_index: Arc<dyn VectorIndex>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            vector_index,
            embedding_provider,
            generator,
        }
    }

    /// `search(query, index, filters, limit)` — retrieval only, no generation (spec §6).
    pub async fn search(
        &self,
        query: &str,
        index: &str,
        filters: &[TagFilter],
        limit: usize,
    ) -> Result<Vec<RelevantSource>, AppError> {
        let embedding = self.embedding_provider.embed(query).await?;
        let hits = self.vector_index.get_similar(index, &embedding, filters, 0.0, limit).await?;
        Ok(hits.into_iter().map(|(record, score)| to_source(&record, score)).collect())
    }

    /// `ask(question, index, filters, min_relevance, limit)` (spec §4.7).
    #[instrument(skip(self, filters))]
    #[allow(clippy::too_many_arguments)]
    pub async fn ask(
        &self,
        question: &str,
        index: &str,
        filters: &[TagFilter],
        min_relevance: f32,
        limit: usize,
        options: GenerationOptions,
    ) -> Result<AskResult, AppError> {
        let embedding = self.embedding_provider.embed(question).await?;
        let hits = self
            .vector_index
            .get_similar(index, &embedding, filters, min_relevance, limit)
            .await?;

        let sources: Vec<RelevantSource> = hits.into_iter().map(|(record, score)| to_source(&record, score)).collect();

        let answer_budget = options.max_tokens as usize;
        let context_window = self.generator.max_tokens().saturating_sub(answer_budget);
        let facts = assemble_facts(&sources, context_window, |text| self.generator.count_tokens(text));

        if facts.is_empty() {
            return Ok(AskResult {
                question: question.to_string(),
                answer: INFO_NOT_FOUND.to_string(),
                no_result: true,
                relevant_sources: Vec::new(),
            });
        }

        let prompt = render_prompt(&facts, question);
        let mut stream = self.generator.generate(&prompt, options).await?;
        let mut answer = String::new();
        while let Some(chunk) = stream.next().await {
            answer.push_str(&chunk?);
        }

        Ok(AskResult {
            question: question.to_string(),
            answer,
            no_result: false,
            relevant_sources: sources,
        })
    }
}

fn to_source(record: &common::storage::types::memory_record::MemoryRecord, score: f32) -> RelevantSource {
    let file_name = record
        .payload
        .get("file_name")
        .and_then(|v| v.as_str())
        .unwrap_or(record.document_id.as_str())
        .to_string();
    let text = record.payload.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    RelevantSource {
        document_id: record.document_id.clone(),
        file_name,
        text,
        relevance: score,
    }
}

/// Concatenate partition texts, each annotated with source name and relevance, stopping
/// once the generator's context window (minus the reserved answer budget) is exhausted
/// (spec §4.7 step 4).
fn assemble_facts(sources: &[RelevantSource], token_budget: usize, count_tokens: impl Fn(&str) -> usize) -> String {
    let mut facts = String::new();
    let mut used_tokens = 0usize;

    for source in sources {
        let annotated = format!("[{} | relevance {:.2}]\n{}\n", source.file_name, source.relevance, source.text);
        let annotated_tokens = count_tokens(&annotated);
        if used_tokens + annotated_tokens > token_budget {
            break;
        }
        facts.push_str(&annotated);
        used_tokens += annotated_tokens;
    }

    facts
}

/// `Facts:\n<facts>\nQuestion: <q>\nAnswer: ` (spec §4.7 step 5).
fn render_prompt(facts: &str, question: &str) -> String {
    format!("Facts:\n{facts}\nQuestion: {question}\nAnswer: ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(relevance: f32, text: &str) -> RelevantSource {
        RelevantSource {
            document_id: "doc1".to_string(),
            file_name: "doc1".to_string(),
            text: text.to_string(),
            relevance,
        }
    }

    #[test]
    fn assemble_facts_stops_at_token_budget() {
        let sources = vec![source(0.9, "one two three"), source(0.8, "four five six")];
        let facts = assemble_facts(&sources, 6, |text| text.split_whitespace().count());
        assert!(facts.contains("one two three"));
        assert!(!facts.contains("four five six"));
    }

    #[test]
    fn assemble_facts_empty_when_no_sources() {
        let facts = assemble_facts(&[], 100, |text| text.split_whitespace().count());
        assert!(facts.is_empty());
    }

    #[test]
    fn render_prompt_matches_spec_template() {
        let prompt = render_prompt("Fact A\n", "What happened?");
        assert_eq!(prompt, "Facts:\nFact A\n\nQuestion: What happened?\nAnswer: ");
    }
}
