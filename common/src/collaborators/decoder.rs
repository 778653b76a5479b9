use async_trait::async_trait;

use crate::error::AppError;

/// A single unit of decoded text (spec §6: "decode(stream) -> FileContent{mime,
/// sections[(page, text, complete_sentence)]}").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub page: u32,
    pub text: String,
    pub complete_sentence: bool,
}

#[derive(Clone, Debug)]
pub struct FileContent {
    pub mime: String,
    pub sections: Vec<Section>,
}

impl FileContent {
    /// Concatenate every section's text in order, the shape `extract` hands to `partition`.
    #[must_use]
    pub fn full_text(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content-decoder collaborator (spec §6). At least one decoder per recognized mime must
/// be registered; an unrecognized mime is a permanent error (spec §8: "File with unknown
/// mime → extract fails Permanent; pipeline Poisoned with reason unsupported_mime").
#[async_trait]
pub trait ContentDecoder: Send + Sync {
    fn supports(&self, mime: &str) -> bool;

    async fn decode(&self, bytes: &[u8], mime: &str) -> Result<FileContent, AppError>;
}

/// Decodes `text/plain`-family mimes by treating the bytes as UTF-8.
pub struct PlainTextDecoder;

#[async_trait]
impl ContentDecoder for PlainTextDecoder {
    fn supports(&self, mime: &str) -> bool {
        matches!(
            mime,
            "text/plain" | "text/markdown" | "text/csv" | "application/octet-stream"
        )
    }

    async fn decode(&self, bytes: &[u8], mime: &str) -> Result<FileContent, AppError> {
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|err| AppError::PermanentIo(format!("invalid UTF-8 in {mime}: {err}")))?;

        Ok(FileContent {
            mime: mime.to_string(),
            sections: vec![Section {
                page: 0,
                text,
                complete_sentence: true,
            }],
        })
    }
}

/// Dispatches to every registered decoder by mime (spec §6). Unknown mimes become a
/// `PermanentIo("unsupported_mime")` error, the exact reason the orchestrator poisons on
/// (spec §8 boundary behavior).
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn ContentDecoder>>,
}

impl DecoderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { decoders: Vec::new() }
    }

    #[must_use]
    pub fn register(mut self, decoder: Box<dyn ContentDecoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    pub async fn decode(&self, bytes: &[u8], mime: &str) -> Result<FileContent, AppError> {
        for decoder in &self.decoders {
            if decoder.supports(mime) {
                return decoder.decode(bytes, mime).await;
            }
        }
        Err(AppError::PermanentIo("unsupported_mime".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DecoderRegistry {
        DecoderRegistry::new().register(Box::new(PlainTextDecoder))
    }

    #[tokio::test]
    async fn decodes_plain_text() {
        let content = registry()
            .decode(b"hello world", "text/plain")
            .await
            .expect("decode");
        assert_eq!(content.full_text(), "hello world");
    }

    #[tokio::test]
    async fn unknown_mime_is_permanent_unsupported_mime_error() {
        let result = registry().decode(b"\x89PNG", "image/png").await;
        assert!(matches!(result, Err(AppError::PermanentIo(reason)) if reason == "unsupported_mime"));
    }

    #[tokio::test]
    async fn invalid_utf8_is_permanent_error() {
        let result = registry().decode(&[0xff, 0xfe, 0xfd], "text/plain").await;
        assert!(matches!(result, Err(AppError::PermanentIo(_))));
    }
}
