use common::stored_object;
use common::tags::TagSet;

stored_object!(ContentRecord, "content_record", {
    content: Vec<u8>,
    mime: String,
    byte_size: u64,
    ready: bool,
    title: Option<String>,
    description: Option<String>,
    tags: TagSet,
    metadata: serde_json::Value,
});

impl ContentRecord {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        content: Vec<u8>,
        mime: impl Into<String>,
        title: Option<String>,
        description: Option<String>,
        tags: TagSet,
        metadata: serde_json::Value,
    ) -> Self {
        let now = chrono::Utc::now();
        let byte_size = content.len() as u64;
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            content,
            mime: mime.into(),
            byte_size,
            ready: false,
            title,
            description,
            tags,
            metadata,
        }
    }
}
