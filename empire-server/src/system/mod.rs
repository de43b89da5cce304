//! Startup checks and database maintenance

pub mod boot;
pub mod optimizer;

pub use boot::{BootEnvironment, BootResult, BootSequence, SystemStatus};
pub use optimizer::{OptimizationReport, PerformanceOptimizer};
