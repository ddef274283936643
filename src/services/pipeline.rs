//! The upload admission pipeline shared by both upload endpoints.
//!
//! Stages run strictly in order and the first failure ends the request:
//!
//! 1. rate limit (per endpoint and client IP)
//! 2. authentication, then admin authorization
//! 3. structural checks (size, MIME allow-list, extension, filename)
//! 4. magic-byte signature check
//! 5. path admission
//! 6. persistence
//!
//! Nothing is written to storage unless every earlier stage passed.

use crate::{
    errors::UploadError,
    models::{
        stored_file::UploadMetadata,
        upload::{ClientContext, UploadOutcome, UploadRequest},
        validation::ValidationResult,
    },
    services::{
        auth::AuthGate,
        path_policy::{self, DEFAULT_ALLOWED_PREFIXES},
        rate_limiter::RateLimiter,
        signature::SignatureTable,
        storage::{ObjectStore, StorageError},
        validation::{self, StructuralRules},
    },
};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Instant};
use uuid::Uuid;

/// Attempts at finding a free object key before giving up.
const MAX_KEY_ATTEMPTS: u32 = 3;

const BASE_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/avif",
    "image/svg+xml",
    "application/pdf",
];

const EXTENDED_MIMES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/avif",
    "image/svg+xml",
    "application/pdf",
    "image/heic",
    "image/heif",
];

/// How the final object key is built from an admitted path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamingScheme {
    /// `{path}/{millis}.{ext}`
    Timestamp,
    /// `admin-uploads/{uid}/{path segments}/{base}_{millis}.{ext}`
    Namespaced,
}

/// Endpoint-specific knobs for the shared pipeline.
pub struct UploadConfig {
    /// Label used in rate-limit keys and logs.
    pub endpoint: &'static str,
    pub allowed_mimes: &'static [&'static str],
    pub max_bytes: usize,
    pub allowed_prefixes: &'static [&'static str],
    pub signatures: SignatureTable,
    pub naming: NamingScheme,
}

impl UploadConfig {
    /// JSON/base64 endpoint: core image and PDF types, timestamp names.
    pub fn json_endpoint(max_bytes: usize) -> Self {
        Self {
            endpoint: "json",
            allowed_mimes: BASE_MIMES,
            max_bytes,
            allowed_prefixes: DEFAULT_ALLOWED_PREFIXES,
            signatures: SignatureTable::standard(),
            naming: NamingScheme::Timestamp,
        }
    }

    /// Multipart endpoint: also accepts HEIC/HEIF, identity-namespaced keys.
    pub fn multipart_endpoint(max_bytes: usize) -> Self {
        Self {
            endpoint: "multipart",
            allowed_mimes: EXTENDED_MIMES,
            max_bytes,
            allowed_prefixes: DEFAULT_ALLOWED_PREFIXES,
            signatures: SignatureTable::standard(),
            naming: NamingScheme::Namespaced,
        }
    }

    fn structural_rules(&self) -> StructuralRules<'_> {
        StructuralRules {
            max_bytes: self.max_bytes,
            allowed_mimes: self.allowed_mimes,
        }
    }
}

pub struct UploadPipeline {
    config: UploadConfig,
    rate_limiter: Arc<RateLimiter>,
    auth: AuthGate,
    store: Arc<dyn ObjectStore>,
}

impl UploadPipeline {
    pub fn new(
        config: UploadConfig,
        rate_limiter: Arc<RateLimiter>,
        auth: AuthGate,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            rate_limiter,
            auth,
            store,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub async fn run(
        &self,
        request: UploadRequest,
        client: &ClientContext,
    ) -> Result<UploadOutcome, UploadError> {
        let started = Instant::now();
        let endpoint = self.config.endpoint;

        let decision = self
            .rate_limiter
            .check(&format!("{}:{}", endpoint, client.ip))
            .await;
        if !decision.allowed {
            tracing::warn!(endpoint, ip = %client.ip, "upload rate limit exceeded");
            return Err(UploadError::RateLimited {
                retry_after_secs: decision.retry_after_secs(Utc::now()),
            });
        }

        let user = self
            .auth
            .authenticate(request.identity_token.as_deref())
            .await
            .ok_or(UploadError::Unauthenticated)?;
        if !self.auth.authorize(&user).await {
            tracing::warn!(uid = %user.uid, user = %user.label(), ip = %client.ip, "non-admin upload attempt");
            return Err(UploadError::Forbidden { uid: user.uid });
        }

        let mime = request.declared_mime.trim().to_ascii_lowercase();
        let mut warnings = Vec::new();
        if mime != request.declared_mime {
            warnings.push(format!(
                "Declared type `{}` normalized to `{}`",
                request.declared_mime, mime
            ));
        }

        let structural = validation::check_structure(
            &request.bytes,
            &mime,
            &request.file_name,
            &self.config.structural_rules(),
        );
        let verdict = validation::verdict_for(&structural, warnings);
        if let Err(err) = structural {
            tracing::warn!(
                uid = %user.uid,
                ip = %client.ip,
                file = %request.file_name,
                errors = ?verdict.errors,
                security_score = verdict.security_score,
                "upload failed structural validation"
            );
            return Err(err.into());
        }

        if !self.config.signatures.validate_signature(&request.bytes, &mime) {
            let verdict = ValidationResult::from_findings(
                vec![format!("File signature does not match {}", mime)],
                verdict.warnings,
            );
            tracing::warn!(
                uid = %user.uid,
                ip = %client.ip,
                mime = %mime,
                file = %request.file_name,
                security_score = verdict.security_score,
                "file signature mismatch"
            );
            return Err(UploadError::SignatureMismatch { mime });
        }
        let validation = verdict;

        let admitted = path_policy::sanitize_path(&request.declared_path, self.config.allowed_prefixes)
            .ok_or_else(|| {
                tracing::warn!(
                    uid = %user.uid,
                    user = %user.label(),
                    ip = %client.ip,
                    path = %request.declared_path,
                    "upload path rejected"
                );
                UploadError::PathRejected(request.declared_path.clone())
            })?;

        let uploaded_at = Utc::now();
        let base_name = generate_filename(&request.file_name, uploaded_at, self.config.naming);
        let directory = match self.config.naming {
            NamingScheme::Timestamp => path_policy::sanitize_segments(&admitted),
            NamingScheme::Namespaced => path_policy::namespaced_key(&user.uid, &admitted),
        };

        let metadata = UploadMetadata {
            uploader_uid: user.uid.clone(),
            original_name: request.file_name.clone(),
            client_ip: Some(client.ip.clone()),
            uploaded_at,
        };
        let size = request.bytes.len();

        let mut attempt = 0;
        let (stored, filename) = loop {
            let filename = if attempt == 0 {
                base_name.clone()
            } else {
                with_unique_suffix(&base_name)
            };
            let key = format!("{}/{}", directory, filename);
            match self
                .store
                .put(&key, request.bytes.clone(), &mime, &metadata)
                .await
            {
                Ok(stored) => break (stored, filename),
                Err(StorageError::KeyExists(_)) if attempt + 1 < MAX_KEY_ATTEMPTS => {
                    tracing::debug!(key = %key, attempt, "object key taken, renaming");
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        key = %key,
                        uid = %user.uid,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %err,
                        "storage write failed"
                    );
                    return Err(err.into());
                }
            }
        };

        tracing::info!(
            endpoint,
            key = %stored.key,
            uid = %user.uid,
            size,
            security_score = validation.security_score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upload stored"
        );

        Ok(UploadOutcome {
            url: self.store.public_url(&stored.key),
            key: stored.key,
            filename,
            size,
            content_type: mime,
            uploaded_at,
            uploader_uid: user.uid,
            validation,
        })
    }
}

/// Collision-resistant object name derived from the upload time.
pub fn generate_filename(original: &str, at: DateTime<Utc>, naming: NamingScheme) -> String {
    let millis = at.timestamp_millis();
    let ext = validation::extension_of(original).unwrap_or_else(|| "bin".into());
    match naming {
        NamingScheme::Timestamp => format!("{}.{}", millis, ext),
        NamingScheme::Namespaced => {
            let stem = std::path::Path::new(original)
                .file_stem()
                .and_then(|s| s.to_str())
                .map(path_policy::sanitize_segment)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "file".into());
            format!("{}_{}.{}", stem, millis, ext)
        }
    }
}

/// `name.ext` becomes `name-1a2b3c4d.ext`.
fn with_unique_suffix(filename: &str) -> String {
    let tag = Uuid::new_v4().simple().to_string();
    let tag = &tag[..8];
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!("{}-{}.{}", stem, tag, ext),
        None => format!("{}-{}", filename, tag),
    }
}
