use std::sync::OnceLock;

use tokenizers::Tokenizer;

/// Shared word-piece tokenizer used for token counting and budgeting on both the
/// embedding and generator sides (spec §4.7: "tokens counted by the generator's
/// tokenizer"). Lazily loaded once per process; grounded in the teacher's
/// `text-splitter`+`tokenizers` chunking pipeline.
static TOKENIZER: OnceLock<Option<Tokenizer>> = OnceLock::new();

fn tokenizer() -> Option<&'static Tokenizer> {
    TOKENIZER
        .get_or_init(|| Tokenizer::from_pretrained("bert-base-cased", None).ok())
        .as_ref()
}

/// The shared tokenizer, for callers (the `partition` handler's chunker) that need a
/// `text_splitter::ChunkSizer` rather than a token count.
#[must_use]
pub fn shared_tokenizer() -> Option<&'static Tokenizer> {
    tokenizer()
}

/// Count tokens in `text`. Falls back to a whitespace-based approximation when the
/// pretrained tokenizer could not be loaded (e.g. no network access), so callers never
/// fail on token counting alone.
#[must_use]
pub fn count_tokens(text: &str) -> usize {
    match tokenizer() {
        Some(tok) => tok.encode(text, false).map(|enc| enc.len()).unwrap_or_else(|_| approximate(text)),
        None => approximate(text),
    }
}

fn approximate(text: &str) -> usize {
    text.split_whitespace().count().max(text.len() / 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approximate_counts_whitespace_tokens() {
        assert_eq!(approximate("one two three"), 3);
    }

    #[test]
    fn count_tokens_is_nonzero_for_nonempty_text() {
        assert!(count_tokens("hello world") > 0);
    }

    #[test]
    fn count_tokens_is_zero_for_empty_text() {
        assert_eq!(count_tokens(""), 0);
    }
}
