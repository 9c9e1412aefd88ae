#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Chatbot Core
//!
//! Conversation processing core for a chat-bot decision backend.
//!
//! ## Overview
//!
//! Every inbound message is driven through a per-conversation state machine
//! (READY → PROCESSING → COMPLETED/ERROR, with ANALYSIS / DECISION /
//! TOOL_EXECUTION / GENERATION phases while processing). Calls to external
//! collaborators run under a failure-recovery stack: errors are categorized,
//! a retry policy is resolved per category, flaky dependencies are isolated
//! by circuit breakers, and failures that escape recovery become user-facing
//! messages plus queued error reports.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Conversation lifecycle with snapshot persistence
//! - [`resilience`] - Circuit breakers and their registry
//! - [`recovery`] - Categorization, retry policies, recovery service, error handler
//! - [`orchestration`] - Per-request decision orchestrator
//! - [`config`] - Layered TOML + environment configuration
//! - [`events`] - Lifecycle event sinks
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error umbrella
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatbot_core::config::ConfigManager;
//! use chatbot_core::state_machine::{ConversationId, ProcessingPhase, ProcessingStateMachine};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! chatbot_core::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//!
//! let machine = ProcessingStateMachine::new(Arc::new(chatbot_core::events::NoopEventSink));
//! let conversation = ConversationId::from(42i64);
//! machine.start_processing(&conversation, ProcessingPhase::Analysis, None)?;
//! machine.transition_to_phase(&conversation, ProcessingPhase::Decision, None)?;
//!
//! println!("{} conversation(s) in {}", machine.conversation_count(), manager.environment());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestration;
pub mod recovery;
pub mod resilience;
pub mod state_machine;

pub use config::{ChatbotConfig, ConfigManager, ConfigurationError};
pub use error::{ChatbotError, Result};
pub use events::{EventPublisher, EventSink, LifecycleEvent, SharedEventSink};
pub use orchestration::{
    Decision, DecisionInput, DecisionOrchestrator, DecisionOrchestratorBuilder, DecisionOutcome,
    OrchestratorError,
};
pub use recovery::{
    ErrorCategory, ErrorHandler, ErrorRecoveryService, OperationError, RetryPolicy, RetryStrategy,
};
pub use resilience::{CircuitBreaker, CircuitBreakerManager, CircuitState};
pub use state_machine::{
    ConversationId, ProcessingPhase, ProcessingState, ProcessingStateMachine, StateEvent,
};
