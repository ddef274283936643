//! Core data models for the upload gateway.
//!
//! Requests and validation results are transient values built per request.
//! `StoredFile` maps to the `stored_files` table via `sqlx::FromRow` and
//! serializes as JSON via `serde`.

pub mod stored_file;
pub mod upload;
pub mod validation;
