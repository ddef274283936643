//! Route table for the upload gateway.
//!
//! ## Structure
//! - **Upload endpoints** (security headers, body limit)
//!   - `POST    /api/upload`        - JSON body with base64 file data
//!   - `POST    /api/admin/upload`  - multipart form (`file`, `path`)
//!   - `OPTIONS` on both            - CORS preflight
//!
//! - **Public files**
//!   - `GET     /files/{bucket}/{*key}` - stream a stored object
//!   - `HEAD    /files/{bucket}/{*key}` - headers only
//!
//! - **Probes**: `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{get_file, head_file},
        health_handlers::{healthz, readyz},
        upload_handlers::{upload_json, upload_multipart, upload_options},
    },
    middleware::{client_context, upload_headers},
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};

/// Headroom for multipart framing and JSON envelopes.
const BODY_OVERHEAD: usize = 64 * 1024;

/// Request body ceiling for a file ceiling of `max_file_bytes`; base64 grows
/// payloads by a third.
pub fn body_limit(max_file_bytes: usize) -> usize {
    max_file_bytes / 3 * 4 + 4 + BODY_OVERHEAD
}

/// Build the router with `state` attached.
pub fn routes(state: AppState) -> Router {
    let max_file_bytes = state
        .json_pipeline
        .config()
        .max_bytes
        .max(state.multipart_pipeline.config().max_bytes);

    let uploads = Router::new()
        .route("/api/upload", post(upload_json).options(upload_options))
        .route(
            "/api/admin/upload",
            post(upload_multipart).options(upload_options),
        )
        .layer(DefaultBodyLimit::max(body_limit(max_file_bytes)))
        .layer(middleware::from_fn_with_state(state.clone(), upload_headers));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files/{bucket}/{*key}", get(get_file).head(head_file))
        .merge(uploads)
        .layer(middleware::from_fn_with_state(state.clone(), client_context))
        .with_state(state)
}
