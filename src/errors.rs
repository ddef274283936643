use crate::services::{storage::StorageError, validation::ValidationError};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failure of one stage of the upload admission pipeline.
///
/// Variants carry enough detail for server-side logs; the text sent to the
/// client is chosen by [`AppError::from`] and never includes storage or
/// identity-provider internals.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("missing or invalid identity token")]
    Unauthenticated,
    #[error("user `{uid}` is not an administrator")]
    Forbidden { uid: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("file signature does not match declared type `{mime}`")]
    SignatureMismatch { mime: String },
    #[error("upload path `{0}` rejected")]
    PathRejected(String),
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// HTTP-facing error rendered as `{"error": .., "message": ..}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: String,
    pub message: String,
    pub retry_after: Option<u64>,
}

impl AppError {
    /// Error with `status`, labelled by the status' canonical reason.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        let error = status
            .canonical_reason()
            .unwrap_or("Error")
            .to_string();
        Self {
            status,
            error,
            message: msg.into(),
            retry_after: None,
        }
    }

    /// Override the short error label.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error,
            "message": self.message,
        }));

        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::RateLimited { retry_after_secs } => {
                let mut app = AppError::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    "Too many upload requests. Please try again later.",
                )
                .with_error("Rate limit exceeded");
                app.retry_after = Some(retry_after_secs);
                app
            }
            UploadError::Unauthenticated => AppError::new(
                StatusCode::UNAUTHORIZED,
                "Authentication required",
            )
            .with_error("Unauthorized"),
            UploadError::Forbidden { .. } => {
                AppError::new(StatusCode::FORBIDDEN, "Admin access required")
                    .with_error("Forbidden")
            }
            UploadError::Validation(validation) => {
                let status = match validation {
                    ValidationError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                AppError::new(status, validation.to_string()).with_error("Invalid file")
            }
            UploadError::SignatureMismatch { .. } => AppError::bad_request(
                "File signature does not match declared type - possible spoofing attempt",
            )
            .with_error("Invalid file"),
            UploadError::PathRejected(_) => {
                AppError::new(StatusCode::FORBIDDEN, "Invalid upload path")
                    .with_error("Forbidden")
            }
            UploadError::BadRequest(msg) => AppError::bad_request(msg).with_error("Bad request"),
            UploadError::Storage(_) => {
                AppError::internal("Upload failed").with_error("Internal server error")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "unhandled error");
        AppError::internal("Internal server error")
    }
}
