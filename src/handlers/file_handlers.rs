//! Public read access to stored uploads. Streams object bodies to avoid
//! buffering in memory.

use crate::{
    errors::AppError,
    models::stored_file::StoredFile,
    services::storage::{LocalObjectStore, StorageError},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// `GET /files/{bucket}/{*key}`: stream a public object.
pub async fn get_file(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    ensure_bucket(&state.files, &bucket, &key)?;
    let (meta, file) = state
        .files
        .open_public(&key)
        .await
        .map_err(|err| storage_to_app(err, &key))?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// `HEAD /files/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_file(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    ensure_bucket(&state.files, &bucket, &key)?;
    let meta = state
        .files
        .fetch_public(&key)
        .await
        .map_err(|err| storage_to_app(err, &key))?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn ensure_bucket(store: &LocalObjectStore, bucket: &str, key: &str) -> Result<(), AppError> {
    if bucket == store.bucket {
        Ok(())
    } else {
        Err(AppError::not_found(format!("{}/{} not found", bucket, key)))
    }
}

fn storage_to_app(err: StorageError, key: &str) -> AppError {
    match err {
        StorageError::NotFound(_) | StorageError::InvalidKey => {
            AppError::not_found(format!("{} not found", key))
        }
        other => {
            tracing::error!(key, error = %other, "failed to read stored file");
            AppError::internal("Failed to read file")
        }
    }
}

fn set_file_headers(headers: &mut HeaderMap, meta: &StoredFile) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.uploaded_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    // Served SVGs must not run script even if one slipped through.
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; style-src 'unsafe-inline'; sandbox"),
    );
}
