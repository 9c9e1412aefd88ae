//! # Lifecycle Events
//!
//! Explicit event sinks injected into each component at construction.
//! [`EventPublisher`] fans events out over a broadcast channel;
//! [`RecordingEventSink`] keeps them in memory for tests.

pub mod publisher;
pub mod types;

pub use publisher::{
    EventPublisher, EventSink, NoopEventSink, RecordingEventSink, SharedEventSink,
};
pub use types::{LifecycleEvent, PublishedEvent};
