use crate::recovery::ErrorCategory;
use crate::state_machine::{ConversationId, ProcessingState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A tool the decision engine may choose to call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Everything the decision step needs for one inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionInput {
    pub conversation_id: ConversationId,
    pub raw_message: String,
    /// Opaque result of upstream message analysis
    #[serde(default)]
    pub analysis: Value,
    #[serde(default)]
    pub available_tools: Vec<ToolDefinition>,
}

impl DecisionInput {
    pub fn new(conversation_id: impl Into<ConversationId>, raw_message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            raw_message: raw_message.into(),
            analysis: Value::Null,
            available_tools: Vec::new(),
        }
    }

    pub fn with_analysis(mut self, analysis: Value) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.available_tools = tools;
        self
    }
}

/// One requested tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// What the decision engine chose to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    Respond {
        message: String,
    },
    Clarify {
        question: String,
    },
    UseTools {
        calls: Vec<ToolCall>,
        #[serde(default)]
        rationale: Option<String>,
    },
}

impl Decision {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Respond { .. } => "respond",
            Self::Clarify { .. } => "clarify",
            Self::UseTools { .. } => "use_tools",
        }
    }

    pub fn uses_tools(&self) -> bool {
        matches!(self, Self::UseTools { .. })
    }
}

/// Outcome of one tool call after recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub call_id: String,
    pub tool: String,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub category: Option<ErrorCategory>,
}

impl ToolExecutionResult {
    pub fn succeeded(call: &ToolCall, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: true,
            output: Some(output),
            error: None,
            category: None,
        }
    }

    pub fn failed(call: &ToolCall, error: String, category: ErrorCategory) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: false,
            output: None,
            error: Some(error),
            category: Some(category),
        }
    }
}

/// Result of successfully processing one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub conversation_id: ConversationId,
    pub decision: Decision,
    /// Text delivered (or to be delivered) to the user
    pub response: String,
    pub tool_results: Vec<ToolExecutionResult>,
    pub final_state: ProcessingState,
}

/// Health output of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub healthy: bool,
    pub persistence_backend: String,
    pub active_conversations: usize,
    pub conversations_by_state: BTreeMap<String, usize>,
    pub open_circuits: Vec<String>,
    pub queued_reports: usize,
    pub metrics: super::metrics::OrchestratorMetricsSnapshot,
}
