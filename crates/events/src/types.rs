//! Event types for the lockstep telemetry stream

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All possible events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Actor events
    /// An actor thread began running
    #[serde(rename = "actor.started")]
    ActorStarted { actor: String, actor_id: u64 },

    /// An actor thread returned
    #[serde(rename = "actor.finished")]
    ActorFinished {
        actor: String,
        actor_id: u64,
        success: bool,
    },

    // Operation events
    /// One timed operation finished successfully
    #[serde(rename = "operation.completed")]
    OperationCompleted {
        actor: String,
        actor_id: u64,
        operation: String,
        data: OperationData,
    },

    /// One timed operation failed
    #[serde(rename = "operation.failed")]
    OperationFailed {
        actor: String,
        actor_id: u64,
        operation: String,
        data: OperationData,
        error: String,
    },

    // Run events
    /// The run was aborted and actors are unwinding
    #[serde(rename = "run.aborted")]
    RunAborted { reason: String },

    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

/// Counters attached to an operation outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationData {
    /// Documents touched by the operation
    pub documents: u64,
    /// Bytes moved by the operation
    pub bytes: u64,
    /// Wall-clock time between start and outcome
    pub duration_us: u64,
}

impl Event {
    /// Get the actor ID associated with this event, if any
    pub fn actor_id(&self) -> Option<u64> {
        match self {
            Event::ActorStarted { actor_id, .. } => Some(*actor_id),
            Event::ActorFinished { actor_id, .. } => Some(*actor_id),
            Event::OperationCompleted { actor_id, .. } => Some(*actor_id),
            Event::OperationFailed { actor_id, .. } => Some(*actor_id),
            Event::RunAborted { .. } => None,
            Event::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let event = Event::ActorStarted {
            actor: "HelloWorld".to_string(),
            actor_id: 1,
        };
        let envelope = EventEnvelope::new(event);

        assert!(!envelope.id.is_nil());
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::OperationCompleted {
            actor: "HelloWorld".to_string(),
            actor_id: 3,
            operation: "Write".to_string(),
            data: OperationData {
                documents: 1,
                bytes: 13,
                duration_us: 5,
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("operation.completed"));
        assert!(json.contains("\"documents\":1"));
        assert!(json.contains("\"bytes\":13"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"actor.finished","actor":"Loader","actor_id":7,"success":false}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        match event {
            Event::ActorFinished {
                actor,
                actor_id,
                success,
            } => {
                assert_eq!(actor, "Loader");
                assert_eq!(actor_id, 7);
                assert!(!success);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_actor_id() {
        let event = Event::ActorStarted {
            actor: "HelloWorld".to_string(),
            actor_id: 42,
        };
        assert_eq!(event.actor_id(), Some(42));

        let aborted = Event::RunAborted {
            reason: "test".to_string(),
        };
        assert_eq!(aborted.actor_id(), None);
    }
}
