use super::context::ConversationId;
use super::events::StateEvent;
use super::states::{ProcessingPhase, ProcessingState};
use std::fmt::Display;
use thiserror::Error;

/// Contract violations raised by the processing state machine.
///
/// These indicate a caller defect and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error(
        "Invalid transition for conversation {conversation_id}: event {event} not allowed from {from}; valid events: {}",
        display_list(.valid_events)
    )]
    InvalidTransition {
        conversation_id: ConversationId,
        from: ProcessingState,
        event: StateEvent,
        valid_events: Vec<StateEvent>,
    },

    #[error(
        "Invalid phase transition for conversation {conversation_id}: {from} -> {to}; valid phases: {}",
        display_list(.valid_phases)
    )]
    InvalidPhaseTransition {
        conversation_id: ConversationId,
        from: ProcessingPhase,
        to: ProcessingPhase,
        valid_phases: Vec<ProcessingPhase>,
    },

    #[error("Conversation {conversation_id} is not processing (current state: {state})")]
    NotProcessing {
        conversation_id: ConversationId,
        state: ProcessingState,
    },
}

impl StateMachineError {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::InvalidTransition {
                conversation_id, ..
            }
            | Self::InvalidPhaseTransition {
                conversation_id, ..
            }
            | Self::NotProcessing {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Errors raised by state persistence backends
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Persistence backend error: {reason}")]
    Backend { reason: String },

    #[error("Unsupported state schema version {found} (expected {expected})")]
    UnsupportedSchemaVersion { found: u32, expected: u32 },

    #[error("Malformed state record: {reason}")]
    MalformedRecord { reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;

fn display_list<T: Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
