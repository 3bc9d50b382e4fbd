use chrono::Utc;
use uuid::Uuid;

use crate::stored_object;

stored_object!(ChunkRecord, "chunk_record", {
    doc_id: String,
    tenant_id: String,
    text: String,
    page_num: Option<u32>,
    metadata: serde_json::Value,
    embedding: Vec<f32>,
});

impl ChunkRecord {
    pub fn new(
        doc_id: String,
        tenant_id: String,
        text: String,
        page_num: Option<u32>,
        metadata: serde_json::Value,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            doc_id,
            tenant_id,
            text,
            page_num,
            metadata,
            embedding,
        }
    }
}
