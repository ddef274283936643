pub mod auth;
pub mod cleanup;
pub mod path_policy;
pub mod pipeline;
pub mod rate_limiter;
pub mod signature;
pub mod storage;
pub mod validation;
