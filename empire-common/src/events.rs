//! Event types and broadcast bus
//!
//! Engines emit [`EmpireEvent`]s on a shared [`EventBus`]; the server streams
//! them to SSE clients. Emission never blocks and never fails the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by engines and the boot sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EmpireEvent {
    /// An engine verified its schema, seeded defaults and registered its jobs
    EngineInitialized {
        engine: String,
        jobs: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// One cycle of a periodic job failed; the next tick retries
    JobCycleFailed {
        job: String,
        error: String,
        failure_count: u64,
        timestamp: DateTime<Utc>,
    },

    /// A content row (post, answer, challenge, edition, video) was created
    ContentCreated {
        engine: String,
        kind: String,
        id: i64,
        timestamp: DateTime<Utc>,
    },

    /// A moderation status decision was applied to a content row
    ModerationDecision {
        engine: String,
        id: i64,
        status: String,
        flags: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Boot sequence finished
    BootSequenceCompleted {
        status: String,
        critical_issues: u32,
        warning_issues: u32,
        timestamp: DateTime<Utc>,
    },
}

impl EmpireEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            EmpireEvent::EngineInitialized { .. } => "EngineInitialized",
            EmpireEvent::JobCycleFailed { .. } => "JobCycleFailed",
            EmpireEvent::ContentCreated { .. } => "ContentCreated",
            EmpireEvent::ModerationDecision { .. } => "ModerationDecision",
            EmpireEvent::BootSequenceCompleted { .. } => "BootSequenceCompleted",
        }
    }

    pub fn content_created(engine: &str, kind: &str, id: i64) -> Self {
        EmpireEvent::ContentCreated {
            engine: engine.to_string(),
            kind: kind.to_string(),
            id,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast bus for [`EmpireEvent`]s
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EmpireEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EmpireEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EmpireEvent,
    ) -> Result<usize, broadcast::error::SendError<EmpireEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EmpireEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(EmpireEvent::content_created("forum", "post", 7)).unwrap();

        match rx.recv().await.unwrap() {
            EmpireEvent::ContentCreated { engine, kind, id, .. } => {
                assert_eq!(engine, "forum");
                assert_eq!(kind, "post");
                assert_eq!(id, 7);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(8);
        assert!(bus.emit(EmpireEvent::content_created("forum", "post", 1)).is_err());
        bus.emit_lossy(EmpireEvent::content_created("forum", "post", 1));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 8);
    }

    #[test]
    fn test_serialized_tag() {
        let event = EmpireEvent::content_created("ugc_video", "video", 3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ContentCreated");
        assert_eq!(event.event_type(), "ContentCreated");
    }
}
