//! Fixed-window request counter keyed by client identifier.
//!
//! State lives in this process only. Every replica keeps its own counters,
//! so the effective global ceiling is `limit × replicas`.

use chrono::{DateTime, Duration, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::{sync::Mutex, task::JoinHandle};

/// Violations tolerated before the window is stretched.
const PENALTY_THRESHOLD: u32 = 3;
/// Multiplier applied to the window once the threshold is reached.
const PENALTY_FACTOR: i32 = 3;
/// Expired records older than this are removed by `sweep`.
const SWEEP_GRACE_SECS: i64 = 5 * 60;

#[derive(Clone, Debug)]
struct RateLimitRecord {
    count: u32,
    reset_at: DateTime<Utc>,
    violations: u32,
}

/// Decision for a single request.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Seconds a rejected client should wait before retrying, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let secs = (self.reset_at - now).num_milliseconds().max(0) as u64;
        secs.div_ceil(1000).max(1)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    records: Arc<Mutex<HashMap<String, RateLimitRecord>>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: std::time::Duration) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(60)),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Utc::now()).await
    }

    /// Count one request for `key` at `now`.
    pub async fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let mut records = self.records.lock().await;

        let record = records
            .entry(key.to_string())
            .and_modify(|rec| {
                if now > rec.reset_at {
                    *rec = RateLimitRecord {
                        count: 0,
                        reset_at: now + self.window,
                        violations: 0,
                    };
                }
            })
            .or_insert_with(|| RateLimitRecord {
                count: 0,
                reset_at: now + self.window,
                violations: 0,
            });

        record.count += 1;
        if record.count > self.limit {
            record.violations += 1;
            if record.violations >= PENALTY_THRESHOLD {
                record.reset_at = now + self.window * PENALTY_FACTOR;
            }
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: record.reset_at,
            };
        }

        RateLimitDecision {
            allowed: true,
            remaining: self.limit - record.count,
            reset_at: record.reset_at,
        }
    }

    /// Drop records whose window closed more than five minutes before `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let grace = Duration::seconds(SWEEP_GRACE_SECS);
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, rec| now - rec.reset_at <= grace);
        before - records.len()
    }

    pub async fn tracked_keys(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Run `sweep` on a fixed interval for the life of the process.
    pub fn spawn_sweeper(self: Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = self.sweep(Utc::now()).await;
                if removed > 0 {
                    tracing::debug!(removed, "swept expired rate limit records");
                }
            }
        })
    }
}
