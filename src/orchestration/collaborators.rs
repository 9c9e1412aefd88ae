//! Narrow interfaces to the services the orchestrator drives. Implementations
//! live outside this crate (language-model client, tool servers, chat
//! platform adapter).

use super::types::{Decision, DecisionInput, ToolCall, ToolExecutionResult};
use crate::recovery::OperationError;
use crate::state_machine::ConversationId;
use async_trait::async_trait;
use serde_json::Value;

/// Chooses how to answer a message
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, input: &DecisionInput) -> Result<Decision, OperationError>;
}

/// Runs a single tool call
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> Result<Value, OperationError>;
}

/// Turns tool results into the final user-facing text
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        input: &DecisionInput,
        decision: &Decision,
        tool_results: &[ToolExecutionResult],
    ) -> Result<String, OperationError>;
}

/// Delivers the final text to the user
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), OperationError>;
}
