mod common;

use bytes::Bytes;
use common::*;
use std::sync::Arc;
use upload_gate::{
    errors::{AppError, UploadError},
    models::upload::{ClientContext, UploadRequest},
    services::{pipeline::UploadConfig, validation::ValidationError},
};

const MAX: usize = 1024 * 1024;

fn request(token: Option<&str>, path: &str, name: &str, mime: &str, bytes: &[u8]) -> UploadRequest {
    UploadRequest {
        identity_token: token.map(String::from),
        declared_path: path.into(),
        file_name: name.into(),
        declared_mime: mime.into(),
        bytes: Bytes::copy_from_slice(bytes),
    }
}

fn client() -> ClientContext {
    ClientContext::new("203.0.113.10")
}

#[tokio::test]
async fn admin_png_upload_is_stored_under_requested_prefix() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    let outcome = pipeline
        .run(
            request(Some(ADMIN_TOKEN), "tags/global", "logo.png", "image/png", PNG_BYTES),
            &client(),
        )
        .await
        .unwrap();

    assert!(outcome.url.contains("tags/global/"));
    assert!(outcome.filename.ends_with(".png"));
    let stem = outcome.filename.trim_end_matches(".png");
    assert!(!stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(outcome.key, format!("tags/global/{}", outcome.filename));
    assert_eq!(outcome.uploader_uid, "alice");
    assert!(outcome.validation.is_valid);
    assert_eq!(outcome.validation.security_score, 100);

    let puts = store.puts.lock().unwrap();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].1, "image/png");
    assert_eq!(puts[0].2, PNG_BYTES.len());
}

#[tokio::test]
async fn pdf_bytes_declared_as_png_are_rejected_before_storage() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    let err = pipeline
        .run(
            request(Some(ADMIN_TOKEN), "tags/global", "logo.png", "image/png", PDF_BYTES),
            &client(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::SignatureMismatch { .. }));
    let app = AppError::from(err);
    assert!(app.message.contains("possible spoofing attempt"));
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn non_admin_is_rejected_before_structural_checks() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    // An empty file would fail the structural stage; getting 403 proves that
    // stage never ran.
    let err = pipeline
        .run(
            request(Some(EDITOR_TOKEN), "tags/global", "logo.png", "image/png", &[]),
            &client(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Forbidden { ref uid } if uid == "bob"));
    assert_eq!(AppError::from(err).status.as_u16(), 403);
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn normalized_mime_is_accepted_with_a_warning() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    let outcome = pipeline
        .run(
            request(Some(ADMIN_TOKEN), "posts", "logo.png", " IMAGE/PNG", PNG_BYTES),
            &client(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.content_type, "image/png");
    assert!(outcome.validation.is_valid);
    assert_eq!(outcome.validation.warnings.len(), 1);
    assert_eq!(outcome.validation.security_score, 90);
}

#[tokio::test]
async fn profile_role_grants_admin_without_claim() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    let outcome = pipeline
        .run(
            request(Some(PROFILE_ADMIN_TOKEN), "posts", "paper.pdf", "application/pdf", PDF_BYTES),
            &client(),
        )
        .await
        .unwrap();
    assert!(outcome.key.starts_with("posts/"));
    assert!(outcome.key.ends_with(".pdf"));
}

#[tokio::test]
async fn missing_or_unknown_token_is_unauthenticated() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    for token in [None, Some("forged")] {
        let err = pipeline
            .run(
                request(token, "tags/global", "logo.png", "image/png", PNG_BYTES),
                &client(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Unauthenticated));
    }
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn rate_limit_applies_before_authentication() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 2, store.clone());
    let req = || request(None, "tags/global", "logo.png", "image/png", PNG_BYTES);

    assert!(matches!(
        pipeline.run(req(), &client()).await,
        Err(UploadError::Unauthenticated)
    ));
    assert!(matches!(
        pipeline.run(req(), &client()).await,
        Err(UploadError::Unauthenticated)
    ));
    let err = pipeline.run(req(), &client()).await.unwrap_err();
    match err {
        UploadError::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 1),
        other => panic!("expected rate limit, got {other:?}"),
    }

    // A different client is unaffected.
    let other = ClientContext::new("198.51.100.1");
    assert!(matches!(
        pipeline.run(req(), &other).await,
        Err(UploadError::Unauthenticated)
    ));
}

#[tokio::test]
async fn traversal_and_unknown_paths_are_rejected() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    for path in ["../../etc/passwd", "unknown/xyz", "products/../../secrets"] {
        let err = pipeline
            .run(
                request(Some(ADMIN_TOKEN), path, "logo.png", "image/png", PNG_BYTES),
                &client(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PathRejected(_)), "path {path}");
        assert_eq!(AppError::from(err).message, "Invalid upload path");
    }
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn dot_segments_do_not_reach_object_keys() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    let outcome = pipeline
        .run(
            request(Some(ADMIN_TOKEN), "products/./launch/", "logo.png", "image/png", PNG_BYTES),
            &client(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.key, format!("products/launch/{}", outcome.filename));
    assert!(!outcome.url.contains("/./"));
}

#[tokio::test]
async fn structural_failures_surface_specific_errors() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(16), 10, store.clone());
    let client = client();
    let run = |name: &'static str, mime: &'static str, bytes: &'static [u8]| {
        pipeline.run(
            request(Some(ADMIN_TOKEN), "products", name, mime, bytes),
            &client,
        )
    };

    let err = run("logo.png", "image/png", &[]).await.unwrap_err();
    assert!(matches!(err, UploadError::Validation(ValidationError::EmptyFile)));

    let err = run("doc.pdf", "application/pdf", PDF_BYTES).await.unwrap_err();
    assert!(matches!(err, UploadError::Validation(ValidationError::FileTooLarge { .. })));
    assert_eq!(AppError::from(err).status.as_u16(), 413);

    let err = run("page.html", "text/html", b"<html>").await.unwrap_err();
    assert!(matches!(err, UploadError::Validation(ValidationError::UnsupportedType(_))));

    let err = run("logo.jpg", "image/png", PNG_BYTES).await.unwrap_err();
    assert!(matches!(err, UploadError::Validation(ValidationError::ExtensionMismatch { .. })));

    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn storage_failure_maps_to_generic_500() {
    let store = Arc::new(RecordingStore::failing());
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store);

    let err = pipeline
        .run(
            request(Some(ADMIN_TOKEN), "resources", "logo.png", "image/png", PNG_BYTES),
            &client(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Storage(_)));
    let app = AppError::from(err);
    assert_eq!(app.status.as_u16(), 500);
    assert_eq!(app.message, "Upload failed");
}

#[tokio::test]
async fn taken_key_is_retried_under_a_new_name() {
    let store = Arc::new(RecordingStore::with_collisions(1));
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    let outcome = pipeline
        .run(
            request(Some(ADMIN_TOKEN), "posts", "logo.png", "image/png", PNG_BYTES),
            &client(),
        )
        .await
        .unwrap();

    let attempted = store.attempted.lock().unwrap().clone();
    assert_eq!(attempted.len(), 2);
    assert_ne!(attempted[0], attempted[1]);
    assert_eq!(outcome.key, attempted[1]);
    assert_eq!(outcome.key, format!("posts/{}", outcome.filename));
    assert!(outcome.url.ends_with(&outcome.key));
    assert!(outcome.filename.ends_with(".png"));
    assert_eq!(store.put_count(), 1);
}

#[tokio::test]
async fn persistent_key_collisions_fail_the_upload() {
    let store = Arc::new(RecordingStore::with_collisions(10));
    let pipeline = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());

    let err = pipeline
        .run(
            request(Some(ADMIN_TOKEN), "posts", "logo.png", "image/png", PNG_BYTES),
            &client(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Storage(_)));
    assert_eq!(store.attempted.lock().unwrap().len(), 3);
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn multipart_config_namespaces_keys_by_uploader() {
    let store = Arc::new(RecordingStore::default());
    let pipeline = pipeline_with(UploadConfig::multipart_endpoint(MAX), 10, store.clone());

    let outcome = pipeline
        .run(
            request(Some(ADMIN_TOKEN), "products/new-range", "hero_shot.png", "image/png", PNG_BYTES),
            &client(),
        )
        .await
        .unwrap();

    assert!(outcome.key.starts_with("admin-uploads/alice/products/new-range/hero_shot_"));
    assert!(outcome.key.ends_with(".png"));
}

#[tokio::test]
async fn heic_only_accepted_where_configured_and_signature_checked() {
    let mut heic = vec![0u8; 32];
    heic[..4].copy_from_slice(&32u32.to_be_bytes());
    heic[4..8].copy_from_slice(b"ftyp");
    heic[8..12].copy_from_slice(b"heic");

    let store = Arc::new(RecordingStore::default());
    let json = pipeline_with(UploadConfig::json_endpoint(MAX), 10, store.clone());
    let err = json
        .run(
            request(Some(ADMIN_TOKEN), "posts", "photo.heic", "image/heic", &heic),
            &client(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(ValidationError::UnsupportedType(_))));

    let multipart = pipeline_with(UploadConfig::multipart_endpoint(MAX), 10, store.clone());
    assert!(
        multipart
            .run(
                request(Some(ADMIN_TOKEN), "posts", "photo.heic", "image/heic", &heic),
                &client(),
            )
            .await
            .is_ok()
    );

    let err = multipart
        .run(
            request(Some(ADMIN_TOKEN), "posts", "photo.heic", "image/heic", PNG_BYTES),
            &client(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::SignatureMismatch { .. }));
    assert_eq!(store.put_count(), 1);
}
