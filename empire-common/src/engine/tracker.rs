//! Per-operation error tracking and named engine counters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::warn;

/// Failure count above which an operation is reported as high-frequency
pub const HIGH_FREQUENCY_THRESHOLD: u64 = 5;

/// Failure history of a single operation
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub operation: String,
    pub count: u64,
    pub last_error: String,
    pub last_at: DateTime<Utc>,
}

/// Counts failures per operation name
///
/// Counts never reset; a recovered job keeps its history for health output.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    records: Mutex<HashMap<String, ErrorRecord>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the operation's new failure count
    pub fn record(&self, operation: &str, error: &str) -> u64 {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let record = records
            .entry(operation.to_string())
            .or_insert_with(|| ErrorRecord {
                operation: operation.to_string(),
                count: 0,
                last_error: String::new(),
                last_at: now,
            });

        record.count += 1;
        record.last_error = error.to_string();
        record.last_at = now;

        if record.count > HIGH_FREQUENCY_THRESHOLD {
            warn!(
                "High-frequency error in {}: {} failures, last: {}",
                operation, record.count, error
            );
        }

        record.count
    }

    pub fn count(&self, operation: &str) -> u64 {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(operation)
            .map(|r| r.count)
            .unwrap_or(0)
    }

    /// All records, ordered by operation name
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<ErrorRecord> = records.values().cloned().collect();
        list.sort_by(|a, b| a.operation.cmp(&b.operation));
        list
    }

    /// Records whose operation name starts with `prefix`
    pub fn snapshot_prefixed(&self, prefix: &str) -> Vec<ErrorRecord> {
        self.snapshot()
            .into_iter()
            .filter(|r| r.operation.starts_with(prefix))
            .collect()
    }
}

/// Named monotonically increasing counters (posts created, jobs run, ...)
#[derive(Debug, Default)]
pub struct EngineMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, amount: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let value = counters.entry(name.to_string()).or_insert(0);
        *value = value.saturating_add(amount);
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_per_operation() {
        let tracker = ErrorTracker::new();
        assert_eq!(tracker.record("forum.moderation", "db locked"), 1);
        assert_eq!(tracker.record("forum.moderation", "db gone"), 2);
        assert_eq!(tracker.record("newsletter.dispatch", "smtp"), 1);

        assert_eq!(tracker.count("forum.moderation"), 2);
        assert_eq!(tracker.count("unknown"), 0);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].operation, "forum.moderation");
        assert_eq!(snapshot[0].last_error, "db gone");
    }

    #[test]
    fn test_counts_keep_growing_past_threshold() {
        let tracker = ErrorTracker::new();
        for _ in 0..=HIGH_FREQUENCY_THRESHOLD {
            tracker.record("challenges.monitor", "boom");
        }
        assert_eq!(tracker.count("challenges.monitor"), HIGH_FREQUENCY_THRESHOLD + 1);
        assert_eq!(tracker.snapshot_prefixed("challenges.").len(), 1);
        assert!(tracker.snapshot_prefixed("forum.").is_empty());
    }

    #[test]
    fn test_metrics() {
        let metrics = EngineMetrics::new();
        metrics.incr("posts_created");
        metrics.incr("posts_created");
        metrics.add("points_awarded", 15);

        assert_eq!(metrics.get("posts_created"), 2);
        assert_eq!(metrics.get("missing"), 0);
        assert_eq!(metrics.snapshot().get("points_awarded"), Some(&15));
    }
}
