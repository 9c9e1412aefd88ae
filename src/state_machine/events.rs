use serde::{Deserialize, Serialize};
use std::fmt;

/// Events that can trigger processing state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateEvent {
    /// A new inbound message starts a request
    MessageReceived,
    /// A processing phase finished; state stays in processing
    PhaseComplete,
    /// The request finished successfully
    ProcessingComplete,
    /// The request failed
    ErrorOccurred,
    /// Return to ready regardless of the current state
    Reset,
}

impl StateEvent {
    pub const ALL: [StateEvent; 5] = [
        Self::MessageReceived,
        Self::PhaseComplete,
        Self::ProcessingComplete,
        Self::ErrorOccurred,
        Self::Reset,
    ];

    /// Get a string representation of the event type for logging and history triggers
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageReceived => "MESSAGE_RECEIVED",
            Self::PhaseComplete => "PHASE_COMPLETE",
            Self::ProcessingComplete => "PROCESSING_COMPLETE",
            Self::ErrorOccurred => "ERROR_OCCURRED",
            Self::Reset => "RESET",
        }
    }
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

impl std::str::FromStr for StateEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.event_type() == s)
            .ok_or_else(|| format!("Invalid state event: {s}"))
    }
}
