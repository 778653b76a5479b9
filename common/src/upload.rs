use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::tags::TagSet;

/// Default step list for a `DocumentUpload` that doesn't specify one (spec §3).
pub const DEFAULT_STEPS: &[&str] = &["extract", "partition", "gen_embeddings", "save_embeddings"];

/// A single file attached to an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Caller-visible submission (spec §3, `DocumentUpload`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub index: String,
    pub document_id: String,
    pub files: Vec<UploadFile>,
    pub tags: TagSet,
    pub steps: Vec<String>,
}

impl DocumentUpload {
    /// Build an upload, generating a `document_id` when absent and defaulting `steps`
    /// (spec §3). Rejects an empty file list (spec §8: "Empty upload → Validation error").
    pub fn new(
        index: impl Into<String>,
        document_id: Option<String>,
        files: Vec<UploadFile>,
        tags: TagSet,
        steps: Option<Vec<String>>,
    ) -> Result<Self, AppError> {
        if files.is_empty() {
            return Err(AppError::Validation("upload must contain at least one file".into()));
        }

        Ok(Self {
            index: index.into(),
            document_id: document_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            files,
            tags,
            steps: steps.unwrap_or_else(|| DEFAULT_STEPS.iter().map(|s| (*s).to_string()).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> UploadFile {
        UploadFile {
            name: name.to_string(),
            bytes: b"hello".to_vec(),
            mime: "text/plain".to_string(),
        }
    }

    #[test]
    fn empty_upload_is_validation_error() {
        let result = DocumentUpload::new("default", None, vec![], TagSet::new(), None);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn document_id_is_generated_when_absent() {
        let upload = DocumentUpload::new("default", None, vec![file("a.txt")], TagSet::new(), None)
            .expect("valid upload");
        assert!(!upload.document_id.is_empty());
    }

    #[test]
    fn default_steps_applied_when_absent() {
        let upload = DocumentUpload::new("default", None, vec![file("a.txt")], TagSet::new(), None)
            .expect("valid upload");
        assert_eq!(upload.steps, vec!["extract", "partition", "gen_embeddings", "save_embeddings"]);
    }
}
