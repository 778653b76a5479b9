use async_trait::async_trait;
use common::error::AppError;

/// A secondary index registered with the write engine, identified by a stable configured
/// id (spec §4.5: "Each index identified by its configured id, not type, so
/// reconfiguration is detectable"). The vector index (C8) is the primary implementor;
/// full-text search is another.
#[async_trait]
pub trait SecondaryIndex: Send + Sync {
    /// The configured id this index answers to in an operation's `index:<id>` step name.
    fn id(&self) -> &str;

    async fn index(&self, content_id: &str, content: &[u8], mime: &str) -> Result<(), AppError>;

    /// Idempotent: removing an absent `content_id` is not an error (spec §4.5 step
    /// semantics: "idempotent").
    async fn remove(&self, content_id: &str) -> Result<(), AppError>;
}
