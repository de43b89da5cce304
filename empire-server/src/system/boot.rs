//! Boot sequence
//!
//! Runs a fixed list of phases before the server accepts requests and
//! classifies the outcome:
//!
//! | critical | warnings | status    |
//! |----------|----------|-----------|
//! | 0        | < 3      | healthy   |
//! | 0        | >= 3     | warning   |
//! | > 0      | any      | critical  |
//!
//! A phase that aborts with an error yields `emergency`. Calling
//! [`BootSequence::run`] while a run is in flight returns the previous result
//! instead of starting a second one.

use crate::system::optimizer::PerformanceOptimizer;
use chrono::{DateTime, Utc};
use empire_common::db::SchemaVerifier;
use empire_common::engine::EngineHost;
use empire_common::events::{EmpireEvent, EventBus};
use empire_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

const WARNING_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Healthy,
    Warning,
    Critical,
    Emergency,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Healthy => "healthy",
            SystemStatus::Warning => "warning",
            SystemStatus::Critical => "critical",
            SystemStatus::Emergency => "emergency",
        }
    }

    pub fn classify(critical: u32, warnings: u32) -> Self {
        if critical > 0 {
            SystemStatus::Critical
        } else if warnings < WARNING_LIMIT {
            SystemStatus::Healthy
        } else {
            SystemStatus::Warning
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootLogEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: &'static str,
    pub status: PhaseStatus,
    pub message: String,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootResult {
    pub success: bool,
    /// Last phase entered
    pub phase: &'static str,
    pub duration_ms: u64,
    pub critical_issues: u32,
    pub warning_issues: u32,
    pub system_status: SystemStatus,
    pub boot_log: Vec<BootLogEntry>,
}

impl BootResult {
    fn started() -> Self {
        Self {
            success: false,
            phase: "initialization",
            duration_ms: 0,
            critical_issues: 0,
            warning_issues: 0,
            system_status: SystemStatus::Critical,
            boot_log: Vec::new(),
        }
    }

    /// Placeholder returned when a run is in flight and none has finished yet
    fn unknown() -> Self {
        Self {
            phase: "unknown",
            ..Self::started()
        }
    }

    fn log(&mut self, status: PhaseStatus, message: impl Into<String>, duration_ms: Option<u64>) {
        self.boot_log.push(BootLogEntry {
            timestamp: Utc::now(),
            phase: self.phase,
            status,
            message: message.into(),
            duration_ms,
        });
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(phase = self.phase, "{}", message);
        self.warning_issues += 1;
        self.log(PhaseStatus::Warning, message, None);
    }

    fn critical(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(phase = self.phase, "{}", message);
        self.critical_issues += 1;
        self.log(PhaseStatus::Error, message, None);
    }

    fn phase_done(&mut self, message: impl Into<String>, started: Instant) {
        let elapsed = started.elapsed().as_millis() as u64;
        self.log(PhaseStatus::Success, message, Some(elapsed));
    }
}

/// Facts about the environment checked by the configuration phase
#[derive(Debug, Clone, Copy, Default)]
pub struct BootEnvironment {
    pub database_url_from_env: bool,
    pub encryption_secret_configured: bool,
}

impl BootEnvironment {
    pub fn detect(encryption_secret_configured: bool) -> Self {
        Self {
            database_url_from_env: std::env::var(empire_common::config::ENV_DATABASE_URL).is_ok(),
            encryption_secret_configured,
        }
    }
}

pub struct BootSequence {
    db: SqlitePool,
    engines: Vec<Arc<EngineHost>>,
    tables: Vec<&'static str>,
    optimizer: Arc<PerformanceOptimizer>,
    environment: BootEnvironment,
    events: EventBus,
    run_jobs: bool,
    in_progress: AtomicBool,
    last_result: RwLock<Option<BootResult>>,
}

impl BootSequence {
    pub fn new(
        db: SqlitePool,
        optimizer: Arc<PerformanceOptimizer>,
        environment: BootEnvironment,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            engines: Vec::new(),
            tables: Vec::new(),
            optimizer,
            environment,
            events,
            run_jobs: false,
            in_progress: AtomicBool::new(false),
            last_result: RwLock::new(None),
        }
    }

    /// Engines to initialize during the engine-health phase
    pub fn with_engines(mut self, engines: Vec<Arc<EngineHost>>, run_jobs: bool) -> Self {
        self.engines = engines;
        self.run_jobs = run_jobs;
        self
    }

    /// Tables whose absence is reported by the schema-integrity phase
    pub fn with_tables(mut self, tables: Vec<&'static str>) -> Self {
        self.tables = tables;
        self
    }

    pub async fn run(&self) -> BootResult {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Boot sequence already in progress");
            return self.last_result().await.unwrap_or_else(BootResult::unknown);
        }

        let start = Instant::now();
        let mut result = BootResult::started();
        info!("Starting boot sequence");
        result.log(PhaseStatus::Success, "Boot sequence initiated", None);

        match self.run_phases(&mut result).await {
            Ok(()) => {
                result.system_status = SystemStatus::classify(result.critical_issues, result.warning_issues);
                result.success = result.critical_issues == 0;
                result.phase = "completion";
                result.log(
                    PhaseStatus::Success,
                    format!("Boot sequence completed - status: {}", result.system_status.as_str()),
                    None,
                );
            }
            Err(e) => {
                error!("Boot sequence aborted in phase {}: {}", result.phase, e);
                result.system_status = SystemStatus::Emergency;
                result.success = false;
                result.log(PhaseStatus::Error, format!("Boot sequence failed: {}", e), None);
            }
        }
        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Boot sequence finished: status={} critical={} warnings={} duration={}ms",
            result.system_status.as_str(),
            result.critical_issues,
            result.warning_issues,
            result.duration_ms
        );
        self.events.emit_lossy(EmpireEvent::BootSequenceCompleted {
            status: result.system_status.as_str().to_string(),
            critical_issues: result.critical_issues,
            warning_issues: result.warning_issues,
            timestamp: Utc::now(),
        });

        *self.last_result.write().await = Some(result.clone());
        self.in_progress.store(false, Ordering::Release);
        result
    }

    pub async fn last_result(&self) -> Option<BootResult> {
        self.last_result.read().await.clone()
    }

    /// True once a run succeeded without critical issues
    pub async fn is_ready(&self) -> bool {
        self.last_result
            .read()
            .await
            .as_ref()
            .is_some_and(|r| r.success && r.system_status != SystemStatus::Critical)
    }

    async fn run_phases(&self, result: &mut BootResult) -> Result<()> {
        self.database_connectivity(result).await;
        self.schema_integrity(result).await?;
        self.engine_health(result).await;
        self.performance(result).await;
        self.configuration(result);
        self.final_readiness(result).await;
        Ok(())
    }

    async fn database_connectivity(&self, result: &mut BootResult) {
        result.phase = "database-connectivity";
        let started = Instant::now();

        match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&self.db).await {
            Ok(_) => result.phase_done("Database connectivity validated", started),
            Err(e) => result.critical(format!("Database connectivity failed: {}", e)),
        }
    }

    async fn schema_integrity(&self, result: &mut BootResult) -> Result<()> {
        result.phase = "schema-integrity";
        let started = Instant::now();

        let missing = SchemaVerifier::missing_tables(&self.db, &self.tables).await?;
        for table in &missing {
            result.warn(format!("Table {} is missing", table));
        }
        result.phase_done(
            format!("{} of {} tables present", self.tables.len() - missing.len(), self.tables.len()),
            started,
        );
        Ok(())
    }

    async fn engine_health(&self, result: &mut BootResult) {
        result.phase = "engine-health";
        let started = Instant::now();

        let mut ready = 0;
        for host in &self.engines {
            match host.initialize(self.run_jobs).await {
                Ok(()) => ready += 1,
                Err(e) => result.critical(format!("Engine {} failed to initialize: {}", host.name(), e)),
            }
        }
        result.phase_done(format!("{} of {} engines initialized", ready, self.engines.len()), started);
    }

    async fn performance(&self, result: &mut BootResult) {
        result.phase = "performance";
        let started = Instant::now();

        match self.optimizer.run().await {
            Ok(Some(report)) if report.failed_actions() > 0 => {
                result.warn(format!("{} optimization actions failed", report.failed_actions()));
            }
            Ok(Some(_)) => result.phase_done("Performance optimization completed", started),
            Ok(None) => result.phase_done("Optimization already running, skipped", started),
            Err(e) => result.warn(format!("Performance optimization had issues: {}", e)),
        }
    }

    fn configuration(&self, result: &mut BootResult) {
        result.phase = "configuration";
        let started = Instant::now();

        if !self.environment.database_url_from_env {
            result.warn("DATABASE_URL is not set; using the configured database");
        }
        if !self.environment.encryption_secret_configured {
            result.warn("API_KEY_ENCRYPTION_SECRET is not set; stored API keys will not survive a restart");
        }
        result.phase_done("Configuration validated", started);
    }

    async fn final_readiness(&self, result: &mut BootResult) {
        result.phase = "final-readiness";
        let started = Instant::now();

        let mut initialized = 0;
        for host in &self.engines {
            if host.is_initialized().await {
                initialized += 1;
            }
        }
        result.phase_done(
            format!("{} engines ready, {} critical issues", initialized, result.critical_issues),
            started,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::forum::{self, ForumEngine};
    use empire_common::db::{connect, SchemaSync};
    use empire_common::engine::JobScheduler;

    fn all_set() -> BootEnvironment {
        BootEnvironment {
            database_url_from_env: true,
            encryption_secret_configured: true,
        }
    }

    async fn forum_host(pool: &SqlitePool, events: &EventBus) -> Arc<EngineHost> {
        let engine = Arc::new(ForumEngine::new(pool.clone(), events.clone()));
        Arc::new(EngineHost::new(engine, pool.clone(), JobScheduler::new(events.clone()), events.clone()))
    }

    #[test]
    fn test_classify() {
        assert_eq!(SystemStatus::classify(0, 0), SystemStatus::Healthy);
        assert_eq!(SystemStatus::classify(0, 2), SystemStatus::Healthy);
        assert_eq!(SystemStatus::classify(0, 3), SystemStatus::Warning);
        assert_eq!(SystemStatus::classify(1, 0), SystemStatus::Critical);
    }

    #[tokio::test]
    async fn test_healthy_boot_initializes_engines() {
        let pool = connect("sqlite::memory:").await.unwrap();
        SchemaSync::ensure_all(&pool, &forum::tables()).await.unwrap();
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let host = forum_host(&pool, &events).await;

        let boot = BootSequence::new(pool.clone(), Arc::new(PerformanceOptimizer::new(pool)), all_set(), events)
            .with_engines(vec![host.clone()], false)
            .with_tables(vec!["forum_categories", "forum_posts"]);

        assert!(!boot.is_ready().await);
        let result = boot.run().await;

        assert_eq!(result.system_status, SystemStatus::Healthy);
        assert!(result.success);
        assert_eq!(result.critical_issues, 0);
        assert!(host.is_initialized().await);
        assert!(boot.is_ready().await);

        let phases: Vec<_> = result.boot_log.iter().map(|e| e.phase).collect();
        for phase in ["database-connectivity", "schema-integrity", "engine-health", "performance", "configuration", "final-readiness"] {
            assert!(phases.contains(&phase), "missing phase {}", phase);
        }

        let mut saw_boot = false;
        while let Ok(event) = rx.try_recv() {
            if let EmpireEvent::BootSequenceCompleted { status, .. } = event {
                assert_eq!(status, "healthy");
                saw_boot = true;
            }
        }
        assert!(saw_boot);
    }

    #[tokio::test]
    async fn test_missing_tables_warn_and_failed_engine_is_critical() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let events = EventBus::new(16);
        let host = forum_host(&pool, &events).await;

        let boot = BootSequence::new(
            pool.clone(),
            Arc::new(PerformanceOptimizer::new(pool)),
            BootEnvironment::default(),
            events,
        )
        .with_engines(vec![host], false)
        .with_tables(vec!["forum_categories", "forum_posts", "forum_answers"]);

        let result = boot.run().await;

        // Three missing tables plus two configuration warnings
        assert_eq!(result.warning_issues, 5);
        assert_eq!(result.critical_issues, 1);
        assert_eq!(result.system_status, SystemStatus::Critical);
        assert!(!result.success);
        assert!(!boot.is_ready().await);
    }

    #[tokio::test]
    async fn test_reentrant_call_returns_last_result() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let boot = BootSequence::new(
            pool.clone(),
            Arc::new(PerformanceOptimizer::new(pool)),
            all_set(),
            EventBus::new(4),
        );

        boot.in_progress.store(true, Ordering::Release);
        let placeholder = boot.run().await;
        assert_eq!(placeholder.phase, "unknown");
        assert!(!placeholder.success);

        boot.in_progress.store(false, Ordering::Release);
        let first = boot.run().await;
        assert!(first.success);

        boot.in_progress.store(true, Ordering::Release);
        let replay = boot.run().await;
        assert_eq!(replay.duration_ms, first.duration_ms);
        assert_eq!(replay.boot_log.len(), first.boot_log.len());
    }
}
