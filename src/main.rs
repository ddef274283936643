use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, net::SocketAddr, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use upload_gate::{
    config, db,
    routes::routes,
    services::{
        auth::{AuthGate, JwtIdentityVerifier},
        cleanup::CleanupService,
        pipeline::{UploadConfig, UploadPipeline},
        rate_limiter::RateLimiter,
        storage::{LocalObjectStore, ObjectStore},
    },
    state::AppState,
};

const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting upload-gate with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let pool = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Apply schema (idempotent); `--migrate` stops here ---
    db::run_migrations(&pool).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let store = Arc::new(LocalObjectStore::new(
        pool.clone(),
        cfg.storage_dir.clone(),
        cfg.bucket.clone(),
        cfg.public_base_url.clone(),
    ));
    let verifier = Arc::new(JwtIdentityVerifier::new(
        &cfg.jwt_secret,
        cfg.jwt_issuer.as_deref(),
        pool.clone(),
    ));
    let auth = AuthGate::new(verifier);
    let window = Duration::from_secs(cfg.rate_window_secs);

    let pipeline = |upload_config: UploadConfig| {
        let limiter = Arc::new(RateLimiter::new(cfg.rate_limit, window));
        limiter.clone().spawn_sweeper(RATE_LIMIT_SWEEP_INTERVAL);
        Arc::new(UploadPipeline::new(
            upload_config,
            limiter,
            auth.clone(),
            store.clone() as Arc<dyn ObjectStore>,
        ))
    };
    let state = AppState {
        json_pipeline: pipeline(UploadConfig::json_endpoint(cfg.max_upload_bytes())),
        multipart_pipeline: pipeline(UploadConfig::multipart_endpoint(cfg.max_upload_bytes())),
        files: store.clone(),
        cors_origin: cfg.cors_origin.clone(),
        trust_proxy: cfg.trust_proxy,
    };

    let _cleanup = Arc::new(CleanupService::new(pool.clone())).start();

    // --- Build router ---
    let app: Router = routes::routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
