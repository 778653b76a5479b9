use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::stored_object;
use crate::tags::TagSet;

/// Kind of artifact a pipeline file represents (spec §3).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ArtifactType {
    Undefined,
    Text,
    TextPartition,
    TextEmbeddingVector,
    SyntheticData,
}

/// A derived artifact, appended rather than replacing its parent (spec §4.2: "Files grow
/// monotonically").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub artifact_type: ArtifactType,
    pub blob_location: String,
}

/// One uploaded file plus every artifact generated from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineFile {
    pub id: String,
    pub name: String,
    pub mime: String,
    pub blob_location: String,
    pub artifact_type: ArtifactType,
    pub generated_files: Vec<GeneratedFile>,
}

impl PipelineFile {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, mime: impl Into<String>, blob_location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime: mime.into(),
            blob_location: blob_location.into(),
            artifact_type: ArtifactType::Undefined,
            generated_files: Vec::new(),
        }
    }

    pub fn push_generated(&mut self, name: impl Into<String>, artifact_type: ArtifactType, blob_location: impl Into<String>) -> &GeneratedFile {
        self.generated_files.push(GeneratedFile {
            id: Uuid::new_v4().to_string(),
            parent_id: self.id.clone(),
            name: name.into(),
            artifact_type,
            blob_location: blob_location.into(),
        });
        self.generated_files.last().expect("just pushed")
    }
}

/// Pipeline lifecycle state (spec §4.4 state machine).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipelineStatus {
    Queued,
    Processing,
    Completed,
    Poisoned,
}

stored_object!(Pipeline, "pipeline", {
    index: String,
    document_id: String,
    files: Vec<PipelineFile>,
    tags: TagSet,
    remaining_steps: Vec<String>,
    completed_steps: Vec<String>,
    status: PipelineStatus,
    execution_id: String,
    cancelled: bool,
    failure_reason: Option<String>,
    #[serde(default)]
    saved_memory_record_ids: Vec<String>,
});

impl Pipeline {
    #[must_use]
    pub fn new(index: impl Into<String>, document_id: impl Into<String>, steps: Vec<String>, tags: TagSet, files: Vec<PipelineFile>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            index: index.into(),
            document_id: document_id.into(),
            files,
            tags,
            remaining_steps: steps,
            completed_steps: Vec::new(),
            status: PipelineStatus::Queued,
            execution_id: Uuid::new_v4().to_string(),
            cancelled: false,
            failure_reason: None,
            saved_memory_record_ids: Vec::new(),
        }
    }

    /// Record a `MemoryRecord` id written by `save_embeddings` so `delete_document` can
    /// remove exactly the records this pipeline owns without scanning the vector index
    /// (spec §4.3 `save_embeddings`/`delete_document`). Idempotent.
    pub fn record_saved_memory_record(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.saved_memory_record_ids.contains(&id) {
            self.saved_memory_record_ids.push(id);
        }
    }

    #[must_use]
    pub fn saved_memory_record_ids(&self) -> &[String] {
        &self.saved_memory_record_ids
    }

    /// `remaining[0]`, or `None` if the pipeline has finished (spec §3 invariant).
    #[must_use]
    pub fn next_step(&self) -> Option<&str> {
        self.remaining_steps.first().map(String::as_str)
    }

    /// Move `remaining[0]` to the tail of `completed` (spec §4.2 copy-on-write manifest update).
    /// Mints a fresh `execution_id` so a stale in-flight worker's message is recognized as
    /// superseded (spec §4.4 distributed variant).
    pub fn advance(&mut self) -> Result<(), AppError> {
        if self.remaining_steps.is_empty() {
            return Err(AppError::Conflict(
                "advance called with no remaining steps".into(),
            ));
        }
        let step = self.remaining_steps.remove(0);
        self.completed_steps.push(step);
        self.execution_id = Uuid::new_v4().to_string();
        self.updated_at = chrono::Utc::now();
        self.status = if self.remaining_steps.is_empty() {
            PipelineStatus::Completed
        } else {
            PipelineStatus::Processing
        };
        Ok(())
    }

    pub fn mark_processing(&mut self) {
        if matches!(self.status, PipelineStatus::Queued) {
            self.status = PipelineStatus::Processing;
        }
        self.execution_id = Uuid::new_v4().to_string();
        self.updated_at = chrono::Utc::now();
    }

    pub fn mark_poisoned(&mut self, reason: impl Into<String>) {
        self.status = PipelineStatus::Poisoned;
        self.failure_reason = Some(reason.into());
        self.updated_at = chrono::Utc::now();
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
        self.updated_at = chrono::Utc::now();
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.status, PipelineStatus::Completed)
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        matches!(self.status, PipelineStatus::Poisoned)
    }

    /// Checks the invariant `set(planned) == set(completed) ∪ set(remaining)` and
    /// `completed ∩ remaining == ∅` (spec §8, Testable Property 1).
    #[must_use]
    pub fn steps_partition_is_valid(&self) -> bool {
        self.completed_steps
            .iter()
            .all(|step| !self.remaining_steps.contains(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Vec<String> {
        vec!["extract", "partition", "gen_embeddings", "save_embeddings"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn advance_moves_head_to_completed() {
        let mut pipeline = Pipeline::new("default", "doc1", steps(), TagSet::new(), vec![]);
        let first_exec = pipeline.execution_id.clone();
        pipeline.advance().expect("advance");
        assert_eq!(pipeline.completed_steps, vec!["extract"]);
        assert_eq!(pipeline.next_step(), Some("partition"));
        assert_ne!(pipeline.execution_id, first_exec);
        assert!(pipeline.steps_partition_is_valid());
    }

    #[test]
    fn advancing_through_all_steps_completes() {
        let mut pipeline = Pipeline::new("default", "doc1", steps(), TagSet::new(), vec![]);
        for _ in 0..4 {
            pipeline.advance().expect("advance");
        }
        assert!(pipeline.next_step().is_none());
        assert!(pipeline.is_ready());
    }

    #[test]
    fn advance_on_empty_remaining_is_conflict() {
        let mut pipeline = Pipeline::new("default", "doc1", vec![], TagSet::new(), vec![]);
        assert!(matches!(pipeline.advance(), Err(AppError::Conflict(_))));
    }

    #[test]
    fn poisoned_pipeline_reports_not_ready() {
        let mut pipeline = Pipeline::new("default", "doc1", steps(), TagSet::new(), vec![]);
        pipeline.mark_poisoned("unsupported_mime");
        assert!(pipeline.is_poisoned());
        assert!(!pipeline.is_ready());
    }
}
