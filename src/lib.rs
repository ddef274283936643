//! Admin asset upload gateway.
//!
//! Accepts image and PDF uploads from authenticated administrators, runs
//! them through a fixed admission pipeline (rate limit, identity, structure,
//! magic bytes, path policy) and stores accepted files for public serving.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
