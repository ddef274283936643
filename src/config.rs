use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub public_base_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub max_upload_mb: u64,
    pub rate_limit: u32,
    pub rate_window_secs: u64,
    pub cors_origin: String,
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Admin asset upload gateway")]
pub struct Args {
    /// Host to bind to (overrides UPLOAD_GATE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_GATE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded objects are stored (overrides UPLOAD_GATE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides UPLOAD_GATE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket name used in object paths and public URLs (overrides UPLOAD_GATE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Base URL stored objects are served from (overrides UPLOAD_GATE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// HS256 secret used to verify identity tokens (overrides UPLOAD_GATE_JWT_SECRET)
    #[arg(long)]
    pub jwt_secret: Option<String>,

    /// Expected `iss` claim (overrides UPLOAD_GATE_JWT_ISSUER)
    #[arg(long)]
    pub jwt_issuer: Option<String>,

    /// Upload size ceiling in megabytes (overrides UPLOAD_GATE_MAX_UPLOAD_MB)
    #[arg(long)]
    pub max_upload_mb: Option<u64>,

    /// Requests allowed per client per window (overrides UPLOAD_GATE_RATE_LIMIT)
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Rate limit window length in seconds (overrides UPLOAD_GATE_RATE_WINDOW_SECS)
    #[arg(long)]
    pub rate_window_secs: Option<u64>,

    /// Allowed CORS origin for the upload routes (overrides UPLOAD_GATE_CORS_ORIGIN)
    #[arg(long)]
    pub cors_origin: Option<String>,

    /// Trust forwarded-for headers from a fronting proxy (or UPLOAD_GATE_TRUST_PROXY=true)
    #[arg(long)]
    pub trust_proxy: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// Merge already-parsed CLI args over the environment. CLI values win.
    pub fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("UPLOAD_GATE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("UPLOAD_GATE_PORT", 3000u16)?;
        let env_storage =
            env::var("UPLOAD_GATE_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("UPLOAD_GATE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/upload_gate.db".into());
        let env_bucket = env::var("UPLOAD_GATE_BUCKET").unwrap_or_else(|_| "public-assets".into());
        let env_base_url = env::var("UPLOAD_GATE_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000/files".into());
        let env_issuer = env::var("UPLOAD_GATE_JWT_ISSUER").ok();
        let env_max_mb = env_parse("UPLOAD_GATE_MAX_UPLOAD_MB", 10u64)?;
        let env_rate_limit = env_parse("UPLOAD_GATE_RATE_LIMIT", 10u32)?;
        let env_rate_window = env_parse("UPLOAD_GATE_RATE_WINDOW_SECS", 60u64)?;
        let env_cors = env::var("UPLOAD_GATE_CORS_ORIGIN").unwrap_or_else(|_| "*".into());
        let env_trust_proxy = env_parse("UPLOAD_GATE_TRUST_PROXY", false)?;

        let jwt_secret = match args.jwt_secret {
            Some(secret) => secret,
            None => env::var("UPLOAD_GATE_JWT_SECRET")
                .context("UPLOAD_GATE_JWT_SECRET (or --jwt-secret) must be set")?,
        };

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
            public_base_url: args
                .public_base_url
                .unwrap_or(env_base_url)
                .trim_end_matches('/')
                .to_string(),
            jwt_secret,
            jwt_issuer: args.jwt_issuer.or(env_issuer),
            max_upload_mb: args.max_upload_mb.unwrap_or(env_max_mb),
            rate_limit: args.rate_limit.unwrap_or(env_rate_limit),
            rate_window_secs: args.rate_window_secs.unwrap_or(env_rate_window),
            cors_origin: args.cors_origin.unwrap_or(env_cors),
            trust_proxy: args.trust_proxy || env_trust_proxy,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize) * 1024 * 1024
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("bucket", &self.bucket)
            .field("public_base_url", &self.public_base_url)
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("max_upload_mb", &self.max_upload_mb)
            .field("rate_limit", &self.rate_limit)
            .field("rate_window_secs", &self.rate_window_secs)
            .field("cors_origin", &self.cors_origin)
            .field("trust_proxy", &self.trust_proxy)
            .finish()
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
