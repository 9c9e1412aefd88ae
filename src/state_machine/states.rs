use super::events::StateEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle position of a conversation's current request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    /// Idle, waiting for the next inbound message
    Ready,
    /// A request is moving through the processing phases
    Processing,
    /// The last request finished successfully
    Completed,
    /// The last request failed
    Error,
}

impl ProcessingState {
    /// Every state, in declaration order
    pub const ALL: [ProcessingState; 4] = [
        Self::Ready,
        Self::Processing,
        Self::Completed,
        Self::Error,
    ];

    /// Events accepted from this state, in table order
    pub fn valid_events(&self) -> &'static [StateEvent] {
        match self {
            Self::Ready => &[StateEvent::MessageReceived, StateEvent::Reset],
            Self::Processing => &[
                StateEvent::PhaseComplete,
                StateEvent::ProcessingComplete,
                StateEvent::ErrorOccurred,
                StateEvent::Reset,
            ],
            Self::Completed => &[
                StateEvent::MessageReceived,
                StateEvent::Reset,
                StateEvent::ErrorOccurred,
            ],
            Self::Error => &[
                StateEvent::Reset,
                StateEvent::MessageReceived,
                StateEvent::ErrorOccurred,
            ],
        }
    }

    /// Target state for `event`, or `None` when the table has no entry
    pub fn next_state(&self, event: StateEvent) -> Option<ProcessingState> {
        let target = match (self, event) {
            (Self::Ready, StateEvent::MessageReceived) => Self::Processing,
            (Self::Ready, StateEvent::Reset) => Self::Ready,

            (Self::Processing, StateEvent::PhaseComplete) => Self::Processing,
            (Self::Processing, StateEvent::ProcessingComplete) => Self::Completed,
            (Self::Processing, StateEvent::ErrorOccurred) => Self::Error,
            (Self::Processing, StateEvent::Reset) => Self::Ready,

            (Self::Completed, StateEvent::MessageReceived) => Self::Processing,
            (Self::Completed, StateEvent::Reset) => Self::Ready,
            (Self::Completed, StateEvent::ErrorOccurred) => Self::Error,

            (Self::Error, StateEvent::Reset) => Self::Ready,
            (Self::Error, StateEvent::MessageReceived) => Self::Processing,
            (Self::Error, StateEvent::ErrorOccurred) => Self::Error,

            _ => return None,
        };

        Some(target)
    }

    /// Check if a request is currently in flight
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Check if this is the failure state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self::Ready
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for ProcessingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(Self::Ready),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid processing state: {s}")),
        }
    }
}

/// Pipeline progress while a conversation is in [`ProcessingState::Processing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPhase {
    Analysis,
    Decision,
    ToolExecution,
    Generation,
}

impl ProcessingPhase {
    pub const ALL: [ProcessingPhase; 4] = [
        Self::Analysis,
        Self::Decision,
        Self::ToolExecution,
        Self::Generation,
    ];

    /// Phases that may follow this one
    pub fn allowed_next(&self) -> &'static [ProcessingPhase] {
        match self {
            Self::Analysis => &[Self::Decision, Self::Generation],
            Self::Decision => &[Self::ToolExecution, Self::Generation],
            Self::ToolExecution => &[Self::Generation],
            Self::Generation => &[],
        }
    }

    pub fn can_transition_to(&self, next: ProcessingPhase) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Generation has no successors
    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }
}

impl fmt::Display for ProcessingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Decision => write!(f, "decision"),
            Self::ToolExecution => write!(f, "tool_execution"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

impl std::str::FromStr for ProcessingPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(Self::Analysis),
            "decision" => Ok(Self::Decision),
            "tool_execution" => Ok(Self::ToolExecution),
            "generation" => Ok(Self::Generation),
            _ => Err(format!("Invalid processing phase: {s}")),
        }
    }
}
