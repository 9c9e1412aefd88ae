//! # Conversation Context
//!
//! Per-conversation scratch state owned by the processing state machine:
//! current state and phase, scratch data and a bounded transition log.

use super::states::{ProcessingPhase, ProcessingState};
use crate::constants::TRANSITION_HISTORY_LIMIT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Opaque identifier of one chat
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One entry of a conversation's transition log.
///
/// Phase changes are logged with `from == to == Processing` and the phase
/// name as the trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ProcessingState,
    pub to: ProcessingState,
    pub timestamp: DateTime<Utc>,
    pub trigger: String,
    #[serde(default)]
    pub metadata: Value,
}

impl StateTransition {
    pub fn new(
        from: ProcessingState,
        to: ProcessingState,
        trigger: impl Into<String>,
        metadata: Option<Value>,
    ) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
            trigger: trigger.into(),
            metadata: metadata.unwrap_or(Value::Null),
        }
    }

    /// True for the synthetic entries recorded by phase changes
    pub fn is_phase_change(&self) -> bool {
        self.from == ProcessingState::Processing
            && self.to == ProcessingState::Processing
            && self.trigger.parse::<ProcessingPhase>().is_ok()
    }
}

/// State machine entry for one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineContext {
    pub conversation_id: ConversationId,
    pub current_state: ProcessingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<ProcessingState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<ProcessingPhase>,
    #[serde(default)]
    pub state_data: BTreeMap<String, Value>,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default)]
    pub transition_history: VecDeque<StateTransition>,
}

impl StateMachineContext {
    /// Fresh entry in the ready state
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            current_state: ProcessingState::Ready,
            previous_state: None,
            current_phase: None,
            state_data: BTreeMap::new(),
            last_transition_time: Utc::now(),
            transition_history: VecDeque::with_capacity(TRANSITION_HISTORY_LIMIT),
        }
    }

    /// Append to the history, evicting the oldest entries past the cap
    pub fn record_transition(&mut self, transition: StateTransition) {
        self.last_transition_time = transition.timestamp;
        self.transition_history.push_back(transition);
        self.enforce_history_limit();
    }

    pub(crate) fn enforce_history_limit(&mut self) {
        while self.transition_history.len() > TRANSITION_HISTORY_LIMIT {
            self.transition_history.pop_front();
        }
    }

    /// Drop the phase whenever the state is anything but processing
    pub(crate) fn enforce_phase_invariant(&mut self) {
        if self.current_state != ProcessingState::Processing {
            self.current_phase = None;
        }
    }

    /// Phases visited during the current request, oldest first
    pub fn phase_history(&self) -> Vec<ProcessingPhase> {
        self.transition_history
            .iter()
            .filter(|transition| transition.is_phase_change())
            .filter_map(|transition| transition.trigger.parse().ok())
            .collect()
    }

    /// Time since the last transition
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_transition_time
    }
}
