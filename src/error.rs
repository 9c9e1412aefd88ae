//! # Crate Error Types
//!
//! Umbrella error for callers that do not care which subsystem failed.
//! Each subsystem keeps its own precise error enum; they all convert into
//! [`ChatbotError`].

use crate::config::ConfigurationError;
use crate::orchestration::OrchestratorError;
use crate::recovery::{OperationError, ReportingError};
use crate::state_machine::{PersistenceError, StateMachineError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatbotError {
    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestratorError),

    #[error("Reporting error: {0}")]
    Reporting(#[from] ReportingError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

pub type Result<T> = std::result::Result<T, ChatbotError>;
