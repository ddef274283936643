//! Scheduled removal of expired auth sessions and token revocations.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::{future::Future, sync::Arc};
use tokio::{task::JoinHandle, time::interval};

const FREQUENT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10 * 60);
const DEEP_CLEAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);
const DEEP_CLEAN_RETENTION_DAYS: i64 = 30;
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions_removed: u64,
    pub revocations_removed: u64,
    pub sessions_active: i64,
    pub revocations_active: i64,
}

#[derive(Clone)]
pub struct CleanupService {
    db: Arc<SqlitePool>,
}

impl CleanupService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Start both schedules. Returns the handles for shutdown.
    pub fn start(self: Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let frequent = {
            let svc = self.clone();
            tokio::spawn(async move {
                let mut ticker = interval(FREQUENT_INTERVAL);
                loop {
                    ticker.tick().await;
                    let _ = with_retries("expired-cleanup", || svc.cleanup_expired(Utc::now())).await;
                }
            })
        };
        let deep = tokio::spawn(async move {
            let mut ticker = interval(DEEP_CLEAN_INTERVAL);
            loop {
                ticker.tick().await;
                let _ = with_retries("deep-clean", || self.deep_clean(Utc::now())).await;
            }
        });
        (frequent, deep)
    }

    /// Delete sessions and revocations whose `expiry` has passed.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "expired"))]
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let now_ms = now.timestamp_millis();
        let sessions = sqlx::query("DELETE FROM sessions WHERE expiry < ?")
            .bind(now_ms)
            .execute(&*self.db)
            .await?
            .rows_affected();
        let revocations = sqlx::query("DELETE FROM revoked_tokens WHERE expiry < ?")
            .bind(now_ms)
            .execute(&*self.db)
            .await?
            .rows_affected();

        let report = self.report(sessions, revocations).await?;
        tracing::info!(
            sessions_removed = report.sessions_removed,
            revocations_removed = report.revocations_removed,
            sessions_active = report.sessions_active,
            revocations_active = report.revocations_active,
            "expired session cleanup finished"
        );
        Ok(report)
    }

    /// Delete sessions created, and revocations issued, more than 30 days ago.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "deep"))]
    pub async fn deep_clean(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = (now - Duration::days(DEEP_CLEAN_RETENTION_DAYS)).timestamp_millis();
        let sessions = sqlx::query("DELETE FROM sessions WHERE created_at < ?")
            .bind(cutoff)
            .execute(&*self.db)
            .await?
            .rows_affected();
        let revocations = sqlx::query("DELETE FROM revoked_tokens WHERE revoked_at < ?")
            .bind(cutoff)
            .execute(&*self.db)
            .await?
            .rows_affected();

        let report = self.report(sessions, revocations).await?;
        tracing::info!(
            sessions_removed = report.sessions_removed,
            revocations_removed = report.revocations_removed,
            "deep clean finished"
        );
        Ok(report)
    }

    async fn report(&self, sessions_removed: u64, revocations_removed: u64) -> Result<CleanupReport> {
        let sessions_active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&*self.db)
            .await?;
        let revocations_active: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM revoked_tokens")
            .fetch_one(&*self.db)
            .await?;
        Ok(CleanupReport {
            sessions_removed,
            revocations_removed,
            sessions_active,
            revocations_active,
        })
    }
}

/// Run `job` up to three times, doubling the pause between attempts.
async fn with_retries<F, Fut>(name: &str, mut job: F) -> Result<CleanupReport>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<CleanupReport>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match job().await {
            Ok(report) => return Ok(report),
            Err(err) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(job = name, attempt, error = %err, "cleanup failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(job = name, attempt, error = %err, "cleanup failed");
                return Err(err);
            }
        }
    }
}
