mod common;

use chatbot_core::constants::TRANSITION_HISTORY_LIMIT;
use chatbot_core::events::NoopEventSink;
use chatbot_core::recovery::{categorize_message, ErrorCategory, RetryPolicy, RetryPolicyResolver};
use chatbot_core::state_machine::{
    ConversationId, PersistedStateRecord, ProcessingState, ProcessingStateMachine,
};
use common::strategies::*;
use proptest::prelude::*;
use std::sync::Arc;

fn machine() -> ProcessingStateMachine {
    ProcessingStateMachine::new(Arc::new(NoopEventSink))
}

proptest! {
    /// Property: a rejected event or phase move never changes the conversation
    #[test]
    fn rejected_moves_leave_state_untouched(
        id in conversation_id_strategy(),
        steps in prop::collection::vec(machine_step_strategy(), 1..60),
    ) {
        let machine = machine();
        let conversation = ConversationId::new(id);

        for step in steps {
            let before = machine.snapshot(&conversation);
            let before_state = machine.current_state(&conversation);
            let before_phase = machine.current_phase(&conversation);

            let accepted = match step {
                MachineStep::Event(event) => {
                    let expected = before_state.next_state(event);
                    let result = machine.transition(&conversation, event, None);
                    prop_assert_eq!(result.is_ok(), expected.is_some());
                    if let Some(target) = expected {
                        prop_assert_eq!(machine.current_state(&conversation), target);
                    }
                    result.is_ok()
                }
                MachineStep::Phase(phase) => {
                    machine.transition_to_phase(&conversation, phase, None).is_ok()
                }
            };

            if !accepted {
                prop_assert_eq!(machine.current_state(&conversation), before_state);
                prop_assert_eq!(machine.current_phase(&conversation), before_phase);
                prop_assert_eq!(machine.snapshot(&conversation), before);
            }
        }
    }

    /// Property: a phase is only ever present while processing
    #[test]
    fn phase_only_present_while_processing(
        steps in prop::collection::vec(machine_step_strategy(), 1..60),
    ) {
        let machine = machine();
        let conversation = ConversationId::from(7i64);

        for step in steps {
            let _ = match step {
                MachineStep::Event(event) => machine.transition(&conversation, event, None).map(|_| ()),
                MachineStep::Phase(phase) => machine.transition_to_phase(&conversation, phase, None),
            };

            if machine.current_state(&conversation) != ProcessingState::Processing {
                prop_assert!(machine.current_phase(&conversation).is_none());
            }
        }
    }

    /// Property: transition history never exceeds its cap
    #[test]
    fn history_is_bounded(
        steps in prop::collection::vec(machine_step_strategy(), 1..120),
    ) {
        let machine = machine();
        let conversation = ConversationId::from(11i64);

        for step in steps {
            let _ = match step {
                MachineStep::Event(event) => machine.transition(&conversation, event, None).map(|_| ()),
                MachineStep::Phase(phase) => machine.transition_to_phase(&conversation, phase, None),
            };
            prop_assert!(machine.transition_history(&conversation).len() <= TRANSITION_HISTORY_LIMIT);
        }
    }

    /// Property: any reachable snapshot survives the persisted record format
    #[test]
    fn reachable_snapshots_survive_persistence_format(
        steps in prop::collection::vec(machine_step_strategy(), 1..40),
    ) {
        let machine = machine();
        let conversation = ConversationId::from(99i64);
        machine.initialize(&conversation);

        for step in steps {
            let _ = match step {
                MachineStep::Event(event) => machine.transition(&conversation, event, None).map(|_| ()),
                MachineStep::Phase(phase) => machine.transition_to_phase(&conversation, phase, None),
            };
        }

        let snapshot = machine.snapshot(&conversation).unwrap();
        let payload = PersistedStateRecord::encode_string(&snapshot).unwrap();
        let decoded = PersistedStateRecord::decode_str(&payload).unwrap();
        prop_assert_eq!(decoded, snapshot);
    }

    /// Property: retry delays never exceed the policy cap and never shrink
    #[test]
    fn retry_delays_are_capped_and_monotonic(
        message in error_message_strategy(),
        attempts in 1u32..12,
    ) {
        let category = categorize_message(&message);
        let policy = RetryPolicyResolver::new().resolve(category, None);

        let mut previous = std::time::Duration::ZERO;
        for attempt in 1..=attempts {
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay.as_millis() as u64 <= policy.max_delay_ms);
            prop_assert!(delay >= previous);
            previous = delay;
        }

        if category == ErrorCategory::InvalidRequest {
            prop_assert_eq!(policy, RetryPolicy::no_retry());
        }
    }
}
