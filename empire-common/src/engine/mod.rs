//! Engine runtime
//!
//! An [`Engine`] is a self-contained feature area: it declares the tables it
//! depends on, seeds default rows and contributes [`PeriodicJob`]s. The
//! [`EngineHost`] drives its lifecycle and hands jobs to the shared
//! [`JobScheduler`].

pub mod host;
pub mod scheduler;
pub mod tracker;

pub use host::{EngineHealth, EngineHost};
pub use scheduler::{JobScheduler, PeriodicJob};
pub use tracker::{EngineMetrics, ErrorRecord, ErrorTracker, HIGH_FREQUENCY_THRESHOLD};

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Short identifier, also the prefix of every job name (`forum.moderation`)
    fn name(&self) -> &'static str;

    /// Tables that must exist before the engine may run
    fn required_tables(&self) -> &'static [&'static str];

    /// Insert default rows; must tolerate being run against seeded data
    async fn seed(&self) -> Result<()> {
        Ok(())
    }

    /// Recurring work contributed by this engine
    fn jobs(self: Arc<Self>) -> Vec<PeriodicJob>;

    fn metrics(&self) -> &EngineMetrics;
}
