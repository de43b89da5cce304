//! Periodic job scheduler
//!
//! Each [`PeriodicJob`] runs in its own tokio task ticking on
//! `tokio::time::interval`. A cycle is awaited before the next tick is taken
//! and missed ticks are skipped, so a slow cycle never overlaps itself.
//! Failed or panicking cycles are recorded and the loop carries on.

use crate::engine::tracker::ErrorTracker;
use crate::events::{EmpireEvent, EventBus};
use crate::Result;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type JobTask = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A named unit of recurring work
#[derive(Clone)]
pub struct PeriodicJob {
    pub name: String,
    pub period: Duration,
    task: JobTask,
}

impl PeriodicJob {
    /// Create a job; `task` is invoked once per cycle
    pub fn new<F, Fut>(name: impl Into<String>, period: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            period,
            task: Arc::new(move || task().boxed()),
        }
    }

    /// Run a single cycle outside the scheduler
    pub async fn run_once(&self) -> Result<()> {
        (self.task)().await
    }
}

impl std::fmt::Debug for PeriodicJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicJob")
            .field("name", &self.name)
            .field("period", &self.period)
            .finish()
    }
}

struct Inner {
    cancel: CancellationToken,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    tracker: Arc<ErrorTracker>,
    events: EventBus,
}

/// Owns every running job task; cloning shares the same scheduler
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                tracker: Arc::new(ErrorTracker::new()),
                events,
            }),
        }
    }

    /// Shared error tracker fed by failed cycles
    pub fn tracker(&self) -> Arc<ErrorTracker> {
        Arc::clone(&self.inner.tracker)
    }

    /// Start a job; its first cycle runs one period from now
    pub fn spawn(&self, job: PeriodicJob) {
        if self.inner.cancel.is_cancelled() {
            debug!("Scheduler stopped, not starting job {}", job.name);
            return;
        }

        info!("Starting job {} (every {:?})", job.name, job.period);

        let name = job.name.clone();
        let cancel = self.inner.cancel.child_token();
        let tracker = Arc::clone(&self.inner.tracker);
        let events = self.inner.events.clone();

        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + job.period, job.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let cycle = AssertUnwindSafe((job.task)()).catch_unwind();
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = cycle => outcome,
                };

                let failure = match outcome {
                    Ok(Ok(())) => {
                        debug!("Job {} cycle complete", job.name);
                        None
                    }
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some("cycle panicked".to_string()),
                };

                if let Some(message) = failure {
                    let failure_count = tracker.record(&job.name, &message);
                    error!("Job {} cycle failed ({}): {}", job.name, failure_count, message);
                    events.emit_lossy(EmpireEvent::JobCycleFailed {
                        job: job.name.clone(),
                        error: message,
                        failure_count,
                        timestamp: Utc::now(),
                    });
                }
            }

            debug!("Job {} stopped", job.name);
        });

        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name, handle));
    }

    /// Names of every job started so far
    pub fn job_names(&self) -> Vec<String> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Cancel every job and wait for the tasks to exit
    ///
    /// A cycle in progress is dropped at its next await point.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let tasks: Vec<(String, JoinHandle<()>)> = {
            let mut guard = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        let count = tasks.len();
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                error!("Job {} task ended abnormally: {}", name, e);
            }
        }

        info!("Job scheduler stopped ({} jobs)", count);
    }
}
