//! Transport-neutral request and response shapes for the upload pipeline.

use crate::models::validation::ValidationResult;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A candidate upload, adapted from either the JSON or multipart transport.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    /// Raw identity token, if the client supplied one.
    pub identity_token: Option<String>,
    /// Destination path as requested by the client (untrusted).
    pub declared_path: String,
    /// Filename as supplied by the client (untrusted).
    pub file_name: String,
    /// MIME type as supplied by the client (untrusted).
    pub declared_mime: String,
    pub bytes: Bytes,
}

/// Per-request facts about the caller that do not come from the payload.
#[derive(Clone, Debug)]
pub struct ClientContext {
    pub ip: String,
}

impl ClientContext {
    pub fn new(ip: impl Into<String>) -> Self {
        Self { ip: ip.into() }
    }
}

/// Result of a successful pipeline run.
#[derive(Clone, Debug)]
pub struct UploadOutcome {
    pub url: String,
    pub key: String,
    pub filename: String,
    pub size: usize,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploader_uid: String,
    /// Content verdict for the accepted file.
    pub validation: ValidationResult,
}
