//! Transport adapters for the two upload endpoints. Each one turns its own
//! request shape into an [`UploadRequest`] and hands it to its pipeline.

use crate::{
    errors::{AppError, UploadError},
    models::upload::{ClientContext, UploadOutcome, UploadRequest},
    services::auth::extract_token,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Multipart, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::json;

/// Body of `POST /api/upload`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonUploadBody {
    /// Base64 payload, optionally as a `data:` URL.
    pub file_data: String,
    pub path: String,
    pub file_name: String,
    pub mime_type: String,
}

/// `POST /api/upload`: base64 JSON upload.
pub async fn upload_json(
    State(state): State<AppState>,
    Extension(client): Extension<ClientContext>,
    headers: HeaderMap,
    payload: Result<Json<JsonUploadBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload.map_err(|rejection| {
        AppError::new(rejection.status(), rejection.body_text()).with_error("Bad request")
    })?;

    let bytes = decode_file_data(&body.file_data)?;
    let request = UploadRequest {
        identity_token: extract_token(&headers),
        declared_path: body.path,
        file_name: body.file_name,
        declared_mime: body.mime_type,
        bytes,
    };

    let outcome = state.json_pipeline.run(request, &client).await?;
    Ok(Json(json!({
        "downloadURL": outcome.url,
        "path": outcome.key,
        "method": "json",
    }))
    .into_response())
}

/// `POST /api/admin/upload`: multipart form with `file` and `path` fields.
pub async fn upload_multipart(
    State(state): State<AppState>,
    Extension(client): Extension<ClientContext>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut file: Option<(String, String, Bytes)> = None;
    let mut path: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some((file_name, content_type, data));
            }
            "path" => {
                path = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| UploadError::BadRequest("No file provided".into()))?;
    let path = path.ok_or_else(|| UploadError::BadRequest("No upload path provided".into()))?;

    let request = UploadRequest {
        identity_token: extract_token(&headers),
        declared_path: path,
        file_name,
        declared_mime: content_type,
        bytes,
    };

    let outcome = state.multipart_pipeline.run(request, &client).await?;
    Ok(Json(multipart_success_body(&outcome)).into_response())
}

/// `OPTIONS` on either upload route: CORS preflight.
pub async fn upload_options(State(state): State<AppState>) -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    if let Ok(origin) = HeaderValue::from_str(&state.cors_origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    response
}

fn multipart_success_body(outcome: &UploadOutcome) -> serde_json::Value {
    json!({
        "success": true,
        "message": "File uploaded successfully",
        "downloadURL": outcome.url,
        "path": outcome.key,
        "method": "multipart",
        "data": {
            "url": outcome.url,
            "path": outcome.key,
            "filename": outcome.filename,
            "size": outcome.size,
            "type": outcome.content_type,
            "uploadTime": outcome.uploaded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    })
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text()).with_error("Bad request")
}

/// Decode the base64 payload, accepting a `data:<mime>;base64,` prefix.
fn decode_file_data(raw: &str) -> Result<Bytes, AppError> {
    let encoded = match raw.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(""),
        None => raw,
    };
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map(Bytes::from)
        .map_err(|_| AppError::bad_request("File data is not valid base64").with_error("Bad request"))
}
