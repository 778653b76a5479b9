use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::stored_object;
use crate::tags::TagSet;

stored_object!(MemoryRecord, "memory_record", {
    index: String,
    document_id: String,
    vector: Vec<f32>,
    tags: TagSet,
    payload: serde_json::Value,
});

impl MemoryRecord {
    /// Deterministic record id so re-running ingestion overwrites rather than duplicates
    /// (spec §6 "Persisted layout": "Vector record id: deterministic function of (index,
    /// document_id, partition_seq, generator_model)").
    #[must_use]
    pub fn derive_id(index: &str, document_id: &str, partition_seq: u32, generator_model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(index.as_bytes());
        hasher.update(b"\0");
        hasher.update(document_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(partition_seq.to_le_bytes());
        hasher.update(b"\0");
        hasher.update(generator_model.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// The payload shape stored in `MemoryRecord.payload` (spec §3: "file name, partition text,
/// page number, last-update timestamp").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordPayload {
    pub file_name: String,
    pub text: String,
    pub page_number: Option<u32>,
    pub last_update: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_is_deterministic() {
        let a = MemoryRecord::derive_id("default", "doc1", 0, "text-embedding-3-small");
        let b = MemoryRecord::derive_id("default", "doc1", 0, "text-embedding-3-small");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_id_differs_per_partition() {
        let a = MemoryRecord::derive_id("default", "doc1", 0, "text-embedding-3-small");
        let b = MemoryRecord::derive_id("default", "doc1", 1, "text-embedding-3-small");
        assert_ne!(a, b);
    }
}
