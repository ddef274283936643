//! Represents a file accepted by the pipeline and written to object storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata row for a persisted upload.
///
/// Written once when the bytes land on disk and never mutated afterwards.
/// Removal happens out-of-band.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredFile {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Object key relative to the bucket, e.g. `tags/global/1718000000000.png`.
    pub key: String,

    /// Content type (MIME type) as declared by the uploader and verified.
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the stored payload.
    pub etag: String,

    /// Identity that uploaded the file.
    pub uploader_uid: String,

    /// Filename as supplied by the client.
    pub original_name: String,

    /// Client address the request came from, when known.
    pub client_ip: Option<String>,

    /// Timestamp when the object was written.
    pub uploaded_at: DateTime<Utc>,

    /// Whether the object may be served without credentials.
    pub is_public: bool,
}

/// Descriptive metadata attached to an object at write time.
#[derive(Clone, Debug)]
pub struct UploadMetadata {
    pub uploader_uid: String,
    pub original_name: String,
    pub client_ip: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}
