use crate::recovery::{ErrorCategory, OperationError};
use crate::state_machine::{ConversationId, StateMachineError};
use thiserror::Error;

/// Errors returned by [`super::DecisionOrchestrator::process`]
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The conversation was in a state that cannot accept this request
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    /// A collaborator failed and recovery gave up; the conversation is in ERROR
    #[error("Decision failed for conversation {conversation_id} ({category}): {source}")]
    DecisionFailed {
        conversation_id: ConversationId,
        category: ErrorCategory,
        /// Message safe to show the user
        user_message: String,
        #[source]
        source: OperationError,
    },
}

impl OrchestratorError {
    /// Text suitable for the end user, if the failure has one
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::DecisionFailed { user_message, .. } => Some(user_message),
            Self::StateMachine(_) => None,
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::DecisionFailed { category, .. } => Some(*category),
            Self::StateMachine(_) => None,
        }
    }
}
