//! # Empire Common Library
//!
//! Shared code for the empire services:
//! - Database initialization, table definitions and schema verification
//! - Engine runtime (lifecycle, periodic job scheduler, error tracking)
//! - Event types (EmpireEvent enum) and the broadcast EventBus
//! - Configuration loading
//! - Text helpers (slugs, timeframes, SEO snippets)

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod text;

pub use error::{Error, Result};
