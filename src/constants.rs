//! # System Constants
//!
//! Fixed values shared across the state machine, persistence and recovery
//! layers.

use std::time::Duration;

/// Maximum number of transitions retained per conversation (oldest evicted first)
pub const TRANSITION_HISTORY_LIMIT: usize = 10;

/// Version stamped on every persisted state record
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Default time-to-live for durable state snapshots
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default table holding durable state snapshots
pub const DEFAULT_STATE_TABLE: &str = "conversation_state_snapshots";

/// Component names used for circuit breaker keys and error reports
pub mod components {
    pub const DECISION_ENGINE: &str = "decision_engine";
    pub const TOOL_EXECUTOR: &str = "tool_executor";
    pub const RESPONSE_GENERATOR: &str = "response_generator";
    pub const CHAT_PLATFORM: &str = "chat_platform";
    pub const ORCHESTRATOR: &str = "decision_orchestrator";
}

/// Operation names used for retry policy overrides and circuit breaker keys
pub mod operations {
    pub const DECIDE: &str = "decide";
    pub const EXECUTE_TOOL: &str = "execute_tool";
    pub const GENERATE_RESPONSE: &str = "generate_response";
    pub const SEND_MESSAGE: &str = "send_message";
}

/// Build the `component:operation` key used by circuit breakers and error reports
pub fn dependency_key(component: &str, operation: &str) -> String {
    format!("{component}:{operation}")
}
