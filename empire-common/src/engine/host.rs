//! Engine lifecycle: verify schema, seed, register jobs

use crate::db::SchemaVerifier;
use crate::engine::scheduler::JobScheduler;
use crate::engine::tracker::ErrorRecord;
use crate::engine::Engine;
use crate::events::{EmpireEvent, EventBus};
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Health snapshot of one engine
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub name: String,
    pub initialized: bool,
    pub jobs: Vec<String>,
    pub metrics: BTreeMap<String, u64>,
    pub errors: Vec<ErrorRecord>,
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    jobs: Vec<String>,
}

/// Drives one engine's lifecycle
pub struct EngineHost {
    engine: Arc<dyn Engine>,
    db: SqlitePool,
    scheduler: JobScheduler,
    events: EventBus,
    lifecycle: Mutex<Lifecycle>,
}

impl EngineHost {
    pub fn new(engine: Arc<dyn Engine>, db: SqlitePool, scheduler: JobScheduler, events: EventBus) -> Self {
        Self {
            engine,
            db,
            scheduler,
            events,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.engine.name()
    }

    /// Verify schema, seed defaults and (optionally) start jobs
    ///
    /// Idempotent: concurrent or repeated calls after a successful
    /// initialization return immediately, so jobs are registered exactly once.
    /// A failed initialization leaves the engine uninitialized and may be retried.
    pub async fn initialize(&self, run_jobs: bool) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.initialized {
            return Ok(());
        }

        let name = self.engine.name();
        info!("Initializing engine {}", name);

        if let Err(e) = SchemaVerifier::verify(&self.db, self.engine.required_tables()).await {
            error!("Engine {} failed schema verification: {}", name, e);
            return Err(e);
        }

        self.engine.seed().await?;

        let jobs = Arc::clone(&self.engine).jobs();
        lifecycle.jobs = jobs.iter().map(|j| j.name.clone()).collect();
        if run_jobs {
            for job in jobs {
                self.scheduler.spawn(job);
            }
        } else {
            info!("Engine {}: background jobs disabled", name);
        }

        lifecycle.initialized = true;
        info!("Engine {} initialized ({} jobs)", name, lifecycle.jobs.len());

        self.events.emit_lossy(EmpireEvent::EngineInitialized {
            engine: name.to_string(),
            jobs: lifecycle.jobs.clone(),
            timestamp: Utc::now(),
        });

        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.lifecycle.lock().await.initialized
    }

    pub async fn health(&self) -> EngineHealth {
        let lifecycle = self.lifecycle.lock().await;
        let prefix = format!("{}.", self.engine.name());
        EngineHealth {
            name: self.engine.name().to_string(),
            initialized: lifecycle.initialized,
            jobs: lifecycle.jobs.clone(),
            metrics: self.engine.metrics().snapshot(),
            errors: self.scheduler.tracker().snapshot_prefixed(&prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect, ColumnDefinition, SchemaSync, TableDefinition};
    use crate::engine::{EngineMetrics, PeriodicJob};
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct Sample {
        seeds: AtomicU64,
        metrics: EngineMetrics,
    }

    #[async_trait]
    impl Engine for Sample {
        fn name(&self) -> &'static str {
            "sample"
        }

        fn required_tables(&self) -> &'static [&'static str] {
            &["sample_items"]
        }

        async fn seed(&self) -> Result<()> {
            self.seeds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn jobs(self: Arc<Self>) -> Vec<PeriodicJob> {
            vec![PeriodicJob::new("sample.tick", Duration::from_secs(60), || async { Ok(()) })]
        }

        fn metrics(&self) -> &EngineMetrics {
            &self.metrics
        }
    }

    fn sample() -> Arc<Sample> {
        Arc::new(Sample {
            seeds: AtomicU64::new(0),
            metrics: EngineMetrics::new(),
        })
    }

    async fn pool_with_table() -> SqlitePool {
        let pool = connect("sqlite::memory:").await.unwrap();
        let table = TableDefinition::new("sample_items").column(ColumnDefinition::id());
        SchemaSync::ensure_all(&pool, &[table]).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = pool_with_table().await;
        let scheduler = JobScheduler::new(EventBus::new(8));
        let engine = sample();
        let host = EngineHost::new(engine.clone(), pool, scheduler.clone(), EventBus::new(8));

        let (a, b) = tokio::join!(host.initialize(true), host.initialize(true));
        a.unwrap();
        b.unwrap();
        host.initialize(true).await.unwrap();

        assert_eq!(engine.seeds.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.job_names(), vec!["sample.tick".to_string()]);

        let health = host.health().await;
        assert!(health.initialized);
        assert_eq!(health.jobs, vec!["sample.tick".to_string()]);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_table_fails_loudly() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let scheduler = JobScheduler::new(EventBus::new(8));
        let host = EngineHost::new(sample(), pool, scheduler.clone(), EventBus::new(8));

        let err = host.initialize(true).await.unwrap_err();
        assert!(matches!(err, Error::SchemaVerification { ref table } if table == "sample_items"));
        assert!(!host.is_initialized().await);
        assert!(scheduler.job_names().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_disabled() {
        let pool = pool_with_table().await;
        let scheduler = JobScheduler::new(EventBus::new(8));
        let host = EngineHost::new(sample(), pool, scheduler.clone(), EventBus::new(8));

        host.initialize(false).await.unwrap();
        assert!(scheduler.job_names().is_empty());
        assert_eq!(host.health().await.jobs, vec!["sample.tick".to_string()]);
    }
}
