use crate::recovery::ErrorCategory;
use crate::resilience::CircuitState;
use crate::state_machine::{ConversationId, ProcessingPhase, ProcessingState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle events emitted by the conversation pipeline for observability.
///
/// Events are informational only; no component reads them back to make a
/// control-flow decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    StateTransitioned {
        conversation_id: ConversationId,
        from: ProcessingState,
        to: ProcessingState,
        trigger: String,
    },
    PhaseChanged {
        conversation_id: ConversationId,
        from: Option<ProcessingPhase>,
        to: ProcessingPhase,
    },
    RecoverySucceeded {
        operation: String,
        attempts: u32,
    },
    RetryScheduled {
        operation: String,
        attempt: u32,
        delay_ms: u64,
        category: ErrorCategory,
    },
    RecoveryFailed {
        operation: String,
        attempts: u32,
        category: ErrorCategory,
        message: String,
    },
    CircuitStateChanged {
        key: String,
        from: CircuitState,
        to: CircuitState,
    },
    ErrorHandled {
        component: String,
        operation: String,
        category: ErrorCategory,
        should_retry: bool,
        circuit_open: bool,
    },
    ErrorPatternDetected {
        signature: String,
        occurrences: u64,
    },
    ReportsFlushed {
        count: usize,
    },
    ReportsDropped {
        count: usize,
        reason: String,
    },
}

impl LifecycleEvent {
    /// Dotted event name used for logging and subscriber filtering
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateTransitioned { .. } => "state.transitioned",
            Self::PhaseChanged { .. } => "state.phase_changed",
            Self::RecoverySucceeded { .. } => "recovery.succeeded",
            Self::RetryScheduled { .. } => "recovery.retry_scheduled",
            Self::RecoveryFailed { .. } => "recovery.failed",
            Self::CircuitStateChanged { .. } => "circuit.state_changed",
            Self::ErrorHandled { .. } => "error.handled",
            Self::ErrorPatternDetected { .. } => "error.pattern_detected",
            Self::ReportsFlushed { .. } => "reporting.flushed",
            Self::ReportsDropped { .. } => "reporting.dropped",
        }
    }
}

/// An event together with the time it was emitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub event: LifecycleEvent,
    pub published_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_tagging() {
        let event = LifecycleEvent::RecoverySucceeded {
            operation: "decide".to_string(),
            attempts: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "recovery_succeeded");
        assert_eq!(json["attempts"], 2);
        assert_eq!(event.name(), "recovery.succeeded");
    }
}
