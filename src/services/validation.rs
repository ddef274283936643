//! Structural checks on an upload: size, MIME allow-list, extension and
//! filename shape. Content inspection lives in `signature`.

use crate::models::validation::ValidationResult;
use std::path::Path;
use thiserror::Error;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("File is empty")]
    EmptyFile,

    #[error("File size {size_mb:.2}MB exceeds maximum allowed size of {max_mb}MB")]
    FileTooLarge { size_mb: f64, max_mb: f64 },

    #[error("File type {0} is not allowed")]
    UnsupportedType(String),

    #[error("File extension does not match type {mime}")]
    ExtensionMismatch { mime: String },

    #[error("Filename contains invalid characters")]
    InvalidFilename,
}

/// Limits a structural check is evaluated against.
#[derive(Clone, Debug)]
pub struct StructuralRules<'a> {
    pub max_bytes: usize,
    pub allowed_mimes: &'a [&'static str],
}

/// Extensions accepted for each known MIME type.
pub fn extensions_for(mime: &str) -> &'static [&'static str] {
    match mime {
        "image/jpeg" => &["jpg", "jpeg"],
        "image/png" => &["png"],
        "image/gif" => &["gif"],
        "image/webp" => &["webp"],
        "image/avif" => &["avif"],
        "image/svg+xml" => &["svg"],
        "application/pdf" => &["pdf"],
        "image/heic" => &["heic"],
        "image/heif" => &["heif"],
        _ => &[],
    }
}

/// Lower-cased extension of `file_name`, if it has one.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_safe_filename(file_name: &str) -> bool {
    !file_name.is_empty()
        && file_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Run the structural checks in order and stop at the first failure.
pub fn check_structure(
    bytes: &[u8],
    declared_mime: &str,
    file_name: &str,
    rules: &StructuralRules<'_>,
) -> Result<(), ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::EmptyFile);
    }

    if bytes.len() > rules.max_bytes {
        return Err(ValidationError::FileTooLarge {
            size_mb: round2(bytes.len() as f64 / BYTES_PER_MB),
            max_mb: rules.max_bytes as f64 / BYTES_PER_MB,
        });
    }

    let mime = declared_mime.trim().to_ascii_lowercase();
    if !rules.allowed_mimes.contains(&mime.as_str()) {
        return Err(ValidationError::UnsupportedType(declared_mime.to_string()));
    }

    let matches_extension = extension_of(file_name)
        .map(|ext| extensions_for(&mime).contains(&ext.as_str()))
        .unwrap_or(false);
    if !matches_extension {
        return Err(ValidationError::ExtensionMismatch { mime });
    }

    if !is_safe_filename(file_name) {
        return Err(ValidationError::InvalidFilename);
    }

    Ok(())
}

/// Same checks as [`check_structure`], reported as a [`ValidationResult`].
pub fn validate_structure(
    bytes: &[u8],
    declared_mime: &str,
    file_name: &str,
    rules: &StructuralRules<'_>,
) -> ValidationResult {
    verdict_for(
        &check_structure(bytes, declared_mime, file_name, rules),
        Vec::new(),
    )
}

/// Scored verdict for a structural outcome plus any non-fatal `warnings`.
pub fn verdict_for(
    outcome: &Result<(), ValidationError>,
    warnings: Vec<String>,
) -> ValidationResult {
    let errors = match outcome {
        Ok(()) => Vec::new(),
        Err(err) => vec![err.to_string()],
    };
    ValidationResult::from_findings(errors, warnings)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
