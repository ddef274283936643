use crate::services::{pipeline::UploadPipeline, storage::LocalObjectStore};
use std::sync::Arc;

/// Shared state handed to every handler.
///
/// Each upload endpoint owns its pipeline (and therefore its own rate-limit
/// counters and limits); both typically share the same object store.
#[derive(Clone)]
pub struct AppState {
    pub json_pipeline: Arc<UploadPipeline>,
    pub multipart_pipeline: Arc<UploadPipeline>,
    /// Backing store for public file serving and readiness checks.
    pub files: Arc<LocalObjectStore>,
    pub cors_origin: String,
    /// Whether forwarded-for headers identify the client.
    pub trust_proxy: bool,
}
