//! # Processing State Machine
//!
//! Per-conversation lifecycle tracking with an orthogonal phase sub-state
//! while processing, plus pluggable snapshot persistence so a conversation's
//! position survives process restarts.

pub mod context;
pub mod errors;
pub mod events;
pub mod persistence;
pub mod pg_persistence;
pub mod processing_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use context::{ConversationId, StateMachineContext, StateTransition};
pub use errors::{PersistenceError, PersistenceResult, StateMachineError, StateMachineResult};
pub use events::StateEvent;
pub use persistence::{
    connect_persistence, InMemoryStatePersistence, PersistedStateRecord, SharedStatePersistence,
    StatePersistence,
};
pub use pg_persistence::PgStatePersistence;
pub use processing_state_machine::ProcessingStateMachine;
pub use states::{ProcessingPhase, ProcessingState};
