use chatbot_core::state_machine::{ProcessingPhase, StateEvent};
use proptest::prelude::*;

/// Strategy for generating any state machine event
pub fn state_event_strategy() -> impl Strategy<Value = StateEvent> {
    prop::sample::select(StateEvent::ALL.to_vec())
}

/// Strategy for generating any processing phase
pub fn phase_strategy() -> impl Strategy<Value = ProcessingPhase> {
    prop::sample::select(ProcessingPhase::ALL.to_vec())
}

/// One step of a randomized conversation: an event or a phase move
#[derive(Debug, Clone)]
pub enum MachineStep {
    Event(StateEvent),
    Phase(ProcessingPhase),
}

pub fn machine_step_strategy() -> impl Strategy<Value = MachineStep> {
    prop_oneof![
        state_event_strategy().prop_map(MachineStep::Event),
        phase_strategy().prop_map(MachineStep::Phase),
    ]
}

/// Strategy for generating error messages drawn from common upstream failures
pub fn error_message_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("connect ECONNREFUSED 127.0.0.1:443".to_string()),
        Just("HTTP 429 Too Many Requests".to_string()),
        Just("400 Bad Request: invalid parameter".to_string()),
        Just("503 Service Unavailable".to_string()),
        Just("socket hang up".to_string()),
        "[a-z ]{0,40}",
    ]
}

/// Strategy for generating conversation ids
pub fn conversation_id_strategy() -> impl Strategy<Value = String> {
    prop_oneof!["[0-9]{1,12}", "[a-zA-Z0-9_-]{1,24}"]
}
