use super::{
    context::{ConversationId, StateMachineContext, StateTransition},
    errors::{StateMachineError, StateMachineResult},
    events::StateEvent,
    states::{ProcessingPhase, ProcessingState},
};
use crate::events::{LifecycleEvent, NoopEventSink, SharedEventSink};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Trigger recorded for forced state overrides
const FORCED_TRIGGER: &str = "FORCE_SET_STATE";

/// Per-conversation processing state machine.
///
/// Owns every conversation's [`StateMachineContext`]. Entries for different
/// conversations live in separate map shards, so concurrent work on distinct
/// ids never touches the same entry. Absent conversations read as
/// [`ProcessingState::Ready`] and are materialized on their first successful
/// transition.
pub struct ProcessingStateMachine {
    contexts: DashMap<ConversationId, StateMachineContext>,
    events: SharedEventSink,
}

impl std::fmt::Debug for ProcessingStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingStateMachine")
            .field("conversations", &self.contexts.len())
            .finish()
    }
}

impl Default for ProcessingStateMachine {
    fn default() -> Self {
        Self::new(Arc::new(NoopEventSink))
    }
}

impl ProcessingStateMachine {
    pub fn new(events: SharedEventSink) -> Self {
        Self {
            contexts: DashMap::new(),
            events,
        }
    }

    /// Get the current state; unknown conversations are ready
    pub fn current_state(&self, conversation_id: &ConversationId) -> ProcessingState {
        self.contexts
            .get(conversation_id)
            .map(|context| context.current_state)
            .unwrap_or_default()
    }

    /// Get the current phase; always `None` outside processing
    pub fn current_phase(&self, conversation_id: &ConversationId) -> Option<ProcessingPhase> {
        self.contexts
            .get(conversation_id)
            .and_then(|context| context.current_phase)
    }

    pub fn has_state(&self, conversation_id: &ConversationId) -> bool {
        self.contexts.contains_key(conversation_id)
    }

    /// Materialize a ready entry if none exists
    pub fn initialize(&self, conversation_id: &ConversationId) {
        self.contexts
            .entry(conversation_id.clone())
            .or_insert_with(|| {
                debug!(conversation_id = %conversation_id, "Initialized conversation state");
                StateMachineContext::new(conversation_id.clone())
            });
    }

    /// Apply `event` to the conversation.
    ///
    /// Fails with [`StateMachineError::InvalidTransition`] when the table has
    /// no entry for the current state, leaving the conversation untouched.
    pub fn transition(
        &self,
        conversation_id: &ConversationId,
        event: StateEvent,
        metadata: Option<Value>,
    ) -> StateMachineResult<ProcessingState> {
        let transition = self.with_context(conversation_id, |context| {
            Self::apply_event(context, event, metadata)
        })?;

        let target = transition.to;
        debug!(
            conversation_id = %conversation_id,
            from = %transition.from,
            to = %transition.to,
            event = %event,
            "State transition"
        );
        self.events.emit(LifecycleEvent::StateTransitioned {
            conversation_id: conversation_id.clone(),
            from: transition.from,
            to: transition.to,
            trigger: transition.trigger,
        });

        Ok(target)
    }

    /// Move to `phase` within the processing state.
    ///
    /// The first phase of a request may be any phase; afterwards the target
    /// must be one of [`ProcessingPhase::allowed_next`].
    pub fn transition_to_phase(
        &self,
        conversation_id: &ConversationId,
        phase: ProcessingPhase,
        metadata: Option<Value>,
    ) -> StateMachineResult<()> {
        let previous = self.with_context(conversation_id, |context| {
            if context.current_state != ProcessingState::Processing {
                return Err(StateMachineError::NotProcessing {
                    conversation_id: context.conversation_id.clone(),
                    state: context.current_state,
                });
            }

            let previous = context.current_phase;
            if let Some(current) = previous {
                if !current.can_transition_to(phase) {
                    return Err(StateMachineError::InvalidPhaseTransition {
                        conversation_id: context.conversation_id.clone(),
                        from: current,
                        to: phase,
                        valid_phases: current.allowed_next().to_vec(),
                    });
                }
            }

            context.current_phase = Some(phase);
            context.record_transition(StateTransition::new(
                ProcessingState::Processing,
                ProcessingState::Processing,
                phase.to_string(),
                metadata,
            ));
            Ok(previous)
        })?;

        debug!(
            conversation_id = %conversation_id,
            from = ?previous,
            to = %phase,
            "Phase transition"
        );
        self.events.emit(LifecycleEvent::PhaseChanged {
            conversation_id: conversation_id.clone(),
            from: previous,
            to: phase,
        });

        Ok(())
    }

    /// Fire MESSAGE_RECEIVED then enter `initial_phase`
    pub fn start_processing(
        &self,
        conversation_id: &ConversationId,
        initial_phase: ProcessingPhase,
        metadata: Option<Value>,
    ) -> StateMachineResult<()> {
        self.transition(conversation_id, StateEvent::MessageReceived, metadata.clone())?;
        self.transition_to_phase(conversation_id, initial_phase, metadata)
    }

    /// Fire PROCESSING_COMPLETE
    pub fn complete_processing(
        &self,
        conversation_id: &ConversationId,
        metadata: Option<Value>,
    ) -> StateMachineResult<ProcessingState> {
        self.transition(conversation_id, StateEvent::ProcessingComplete, metadata)
    }

    /// Force the conversation into `state`, bypassing the transition table.
    ///
    /// Reserved for recovery paths such as restoring an interrupted request.
    pub fn set_state(
        &self,
        conversation_id: &ConversationId,
        state: ProcessingState,
        metadata: Option<Value>,
    ) {
        let from = {
            let mut context = self
                .contexts
                .entry(conversation_id.clone())
                .or_insert_with(|| StateMachineContext::new(conversation_id.clone()));

            let from = context.current_state;
            context.previous_state = Some(from);
            context.current_state = state;
            context.current_phase = None;
            context.record_transition(StateTransition::new(from, state, FORCED_TRIGGER, metadata));
            from
        };

        warn!(
            conversation_id = %conversation_id,
            from = %from,
            to = %state,
            "Forced state override"
        );
        self.events.emit(LifecycleEvent::StateTransitioned {
            conversation_id: conversation_id.clone(),
            from,
            to: state,
            trigger: FORCED_TRIGGER.to_string(),
        });
    }

    /// Return to ready and discard scratch data.
    ///
    /// RESET is valid from every state, so this only materializes an entry
    /// for unknown conversations.
    pub fn reset(&self, conversation_id: &ConversationId) -> StateMachineResult<ProcessingState> {
        let state = self.transition(conversation_id, StateEvent::Reset, None)?;
        if let Some(mut context) = self.contexts.get_mut(conversation_id) {
            context.state_data.clear();
        }
        Ok(state)
    }

    /// Replace the conversation's entry with a previously captured snapshot
    pub fn restore_state(&self, conversation_id: &ConversationId, snapshot: StateMachineContext) {
        let mut context = snapshot;
        if context.conversation_id != *conversation_id {
            warn!(
                conversation_id = %conversation_id,
                snapshot_id = %context.conversation_id,
                "Restoring snapshot recorded under a different conversation id"
            );
            context.conversation_id = conversation_id.clone();
        }
        context.enforce_phase_invariant();
        context.enforce_history_limit();

        info!(
            conversation_id = %conversation_id,
            state = %context.current_state,
            history = context.transition_history.len(),
            "Restored conversation state"
        );
        self.contexts.insert(conversation_id.clone(), context);
    }

    /// Copy of the conversation's entry
    pub fn snapshot(&self, conversation_id: &ConversationId) -> Option<StateMachineContext> {
        self.contexts
            .get(conversation_id)
            .map(|context| context.value().clone())
    }

    pub fn transition_history(&self, conversation_id: &ConversationId) -> Vec<StateTransition> {
        self.contexts
            .get(conversation_id)
            .map(|context| context.transition_history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Store a scratch value; materializes the entry if needed
    pub fn set_state_data(&self, conversation_id: &ConversationId, key: impl Into<String>, value: Value) {
        self.contexts
            .entry(conversation_id.clone())
            .or_insert_with(|| StateMachineContext::new(conversation_id.clone()))
            .state_data
            .insert(key.into(), value);
    }

    pub fn state_data(&self, conversation_id: &ConversationId, key: &str) -> Option<Value> {
        self.contexts
            .get(conversation_id)
            .and_then(|context| context.state_data.get(key).cloned())
    }

    pub fn clear_state_data(&self, conversation_id: &ConversationId) {
        if let Some(mut context) = self.contexts.get_mut(conversation_id) {
            context.state_data.clear();
        }
    }

    /// Drop the conversation's entry entirely
    pub fn remove(&self, conversation_id: &ConversationId) -> bool {
        self.contexts.remove(conversation_id).is_some()
    }

    /// Ids of every conversation with an in-memory entry
    pub fn active_conversations(&self) -> Vec<ConversationId> {
        self.contexts.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn conversation_count(&self) -> usize {
        self.contexts.len()
    }

    /// Number of conversations currently in `state`
    pub fn count_in_state(&self, state: ProcessingState) -> usize {
        self.contexts
            .iter()
            .filter(|entry| entry.current_state == state)
            .count()
    }

    /// Remove conversations idle for longer than `max_age`.
    ///
    /// A zero `max_age` removes everything (shutdown).
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let before = self.contexts.len();

        if max_age.is_zero() {
            self.contexts.clear();
        } else {
            let limit = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
            let now = Utc::now();
            self.contexts
                .retain(|_, context| context.idle_for(now) <= limit);
        }

        let removed = before.saturating_sub(self.contexts.len());
        if removed > 0 {
            info!(
                removed = removed,
                remaining = self.contexts.len(),
                max_age_secs = max_age.as_secs(),
                "Cleaned up idle conversations"
            );
        }
        removed
    }

    /// Run `f` against the conversation's entry, materializing it only if
    /// `f` succeeds.
    fn with_context<T>(
        &self,
        conversation_id: &ConversationId,
        f: impl FnOnce(&mut StateMachineContext) -> StateMachineResult<T>,
    ) -> StateMachineResult<T> {
        match self.contexts.entry(conversation_id.clone()) {
            Entry::Occupied(mut occupied) => f(occupied.get_mut()),
            Entry::Vacant(vacant) => {
                let mut context = StateMachineContext::new(conversation_id.clone());
                let result = f(&mut context)?;
                vacant.insert(context);
                Ok(result)
            }
        }
    }

    fn apply_event(
        context: &mut StateMachineContext,
        event: StateEvent,
        metadata: Option<Value>,
    ) -> StateMachineResult<StateTransition> {
        let from = context.current_state;
        let to = from
            .next_state(event)
            .ok_or_else(|| StateMachineError::InvalidTransition {
                conversation_id: context.conversation_id.clone(),
                from,
                event,
                valid_events: from.valid_events().to_vec(),
            })?;

        if from != ProcessingState::Processing && to == ProcessingState::Processing {
            // a new request always starts without a phase
            context.current_phase = None;
        }

        context.previous_state = Some(from);
        context.current_state = to;
        context.enforce_phase_invariant();

        let transition = StateTransition::new(from, to, event.event_type(), metadata);
        context.record_transition(transition.clone());
        Ok(transition)
    }
}
