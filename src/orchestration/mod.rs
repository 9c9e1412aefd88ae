//! # Decision Orchestration
//!
//! Drives one inbound message through analysis, decision, optional tool
//! execution and response generation, composing the state machine, the
//! recovery service and the error handler.
//!
//! ## Core Components
//!
//! - **DecisionOrchestrator**: Per-request driver with snapshot persistence
//!   after every state or phase change
//! - **DecisionOrchestratorBuilder**: Assembles an orchestrator from
//!   configuration and injected collaborators
//! - **Collaborators**: `DecisionEngine`, `ToolExecutor`, `ResponseGenerator`
//!   and `ChatPlatform` seams implemented outside this crate
//! - **OrchestratorMetrics**: Lock-free request counters surfaced in status

pub mod collaborators;
pub mod decision_orchestrator;
pub mod errors;
pub mod metrics;
pub mod types;

pub use collaborators::{ChatPlatform, DecisionEngine, ResponseGenerator, ToolExecutor};
pub use decision_orchestrator::{DecisionOrchestrator, DecisionOrchestratorBuilder};
pub use errors::OrchestratorError;
pub use metrics::{OrchestratorMetrics, OrchestratorMetricsSnapshot};
pub use types::{
    Decision, DecisionInput, DecisionOutcome, OrchestratorStatus, ToolCall, ToolDefinition,
    ToolExecutionResult,
};
