use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Handle for an open multipart session on the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartSession {
    pub key: String,
    pub upload_id: String,
}

/// One uploaded part of a multipart session.
///
/// Part numbers are 1-based. `e_tag` is the identifier the sink returned for
/// the part and doubles as its content checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
    pub e_tag: String,
}

impl PartRecord {
    /// Exclusive end of the byte range covered by this part.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Time-limited credential allowing a client to PUT one object directly to the sink.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PresignedGrant {
    /// URL the client uploads to with HTTP PUT
    pub upload_url: String,
    /// Key the object will be stored under
    pub destination_key: String,
    /// Content type the client must send
    pub content_type: String,
    /// Grant expiration time
    pub expires_at: DateTime<Utc>,
}
