//! Liveness and readiness probes.

use crate::{services::storage::LocalObjectStore, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::json;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`. Never touches I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /readyz`: the metadata database answers and the bucket directory
/// accepts writes. 503 when either fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (database, stored_files) = database_check(&state.files).await;
    let storage = bucket_write_check(&state.files).await;
    let ready = database.ok && storage.ok;

    let status = if ready {
        StatusCode::OK
    } else {
        tracing::warn!(
            database = ?database.error,
            storage = ?storage.error,
            "readiness check failed"
        );
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyReport {
        status: if ready { "ok" } else { "error" },
        stored_files,
        database,
        storage,
    };
    (status, Json(body))
}

async fn database_check(store: &LocalObjectStore) -> (Check, Option<i64>) {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stored_files")
        .fetch_one(&*store.db)
        .await
    {
        Ok(count) => (Check::passed(), Some(count)),
        Err(err) => (Check::failed(format!("query failed: {}", err)), None),
    }
}

/// Round-trips a probe file inside the bucket directory, creating it on
/// first use.
async fn bucket_write_check(store: &LocalObjectStore) -> Check {
    let dir = store.base_path.join(&store.bucket);
    if let Err(err) = fs::create_dir_all(&dir).await {
        return Check::failed(format!("cannot create {}: {}", dir.display(), err));
    }
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    let outcome = match fs::write(&probe, b"readyz").await {
        Ok(()) => match fs::read(&probe).await {
            Ok(bytes) if bytes == b"readyz" => Check::passed(),
            Ok(_) => Check::failed("probe content mismatch"),
            Err(err) => Check::failed(format!("probe read failed: {}", err)),
        },
        Err(err) => Check::failed(format!("probe write failed: {}", err)),
    };
    let _ = fs::remove_file(&probe).await;
    outcome
}

#[derive(Serialize)]
struct ReadyReport {
    status: &'static str,
    stored_files: Option<i64>,
    database: Check,
    storage: Check,
}

#[derive(Serialize)]
struct Check {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Check {
    fn passed() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
