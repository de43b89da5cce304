//! Database maintenance pass
//!
//! Runs SQLite's own maintenance statements. At most one pass runs at a
//! time; a call made while another pass is in flight returns `None`.

use chrono::{DateTime, Utc};
use empire_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

const ACTIONS: &[(&str, &str)] = &[
    ("pragma_optimize", "PRAGMA optimize"),
    ("analyze", "ANALYZE"),
    ("wal_checkpoint", "PRAGMA wal_checkpoint(TRUNCATE)"),
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationAction {
    pub action: &'static str,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub actions: Vec<OptimizationAction>,
}

impl OptimizationReport {
    pub fn failed_actions(&self) -> usize {
        self.actions.iter().filter(|a| !a.success).count()
    }
}

/// Clears the in-flight flag when a pass ends, including on early return
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PerformanceOptimizer {
    db: SqlitePool,
    is_optimizing: AtomicBool,
    last_report: RwLock<Option<OptimizationReport>>,
}

impl PerformanceOptimizer {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            is_optimizing: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    pub fn is_optimizing(&self) -> bool {
        self.is_optimizing.load(Ordering::Acquire)
    }

    /// Run every maintenance statement; individual failures are reported, not returned
    pub async fn run(&self) -> Result<Option<OptimizationReport>> {
        if self
            .is_optimizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Optimization already in progress, skipping");
            return Ok(None);
        }
        let _guard = RunGuard(&self.is_optimizing);

        let started_at = Utc::now();
        let start = Instant::now();
        let mut actions = Vec::with_capacity(ACTIONS.len());

        for &(action, statement) in ACTIONS {
            let step = Instant::now();
            let outcome = sqlx::query(statement).fetch_all(&self.db).await;
            let duration_ms = step.elapsed().as_millis() as u64;

            let (success, message) = match outcome {
                Ok(_) => (true, format!("{} completed", statement)),
                Err(e) => {
                    warn!("Optimization step {} failed: {}", action, e);
                    (false, e.to_string())
                }
            };
            actions.push(OptimizationAction {
                action,
                success,
                message,
                duration_ms,
            });
        }

        let report = OptimizationReport {
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            actions,
        };
        info!(
            "Optimization pass finished in {}ms ({} failed actions)",
            report.duration_ms,
            report.failed_actions()
        );

        *self.last_report.write().await = Some(report.clone());
        Ok(Some(report))
    }

    pub async fn last_report(&self) -> Option<OptimizationReport> {
        self.last_report.read().await.clone()
    }
}
