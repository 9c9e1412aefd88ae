use super::types::{LifecycleEvent, PublishedEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Destination for lifecycle events.
///
/// Implementations must not block and must not fail; emission is
/// fire-and-forget from the caller's point of view.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Shared handle to an event sink
pub type SharedEventSink = Arc<dyn EventSink>;

impl std::fmt::Debug for dyn EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventSink")
    }
}

/// High-throughput event publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: LifecycleEvent) {
        let published = PublishedEvent {
            event,
            published_at: chrono::Utc::now(),
        };

        // No subscribers is fine; events are published even if no one is listening
        if let Err(broadcast::error::SendError(unsent)) = self.sender.send(published) {
            trace!(event = unsent.event.name(), "No event subscribers");
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl EventSink for EventPublisher {
    fn emit(&self, event: LifecycleEvent) {
        self.publish(event);
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: LifecycleEvent) {}
}

/// Sink that keeps every event in memory, for tests and diagnostics
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, in emission order
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// Events whose [`LifecycleEvent::name`] matches `name`
    pub fn events_named(&self, name: &str) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.name() == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publisher_delivers_to_subscribers() {
        let publisher = EventPublisher::new(16);
        let mut receiver = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.emit(LifecycleEvent::ReportsFlushed { count: 3 });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event, LifecycleEvent::ReportsFlushed { count: 3 });
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let publisher = EventPublisher::default();
        publisher.emit(LifecycleEvent::ReportsFlushed { count: 1 });
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn test_recording_sink_filters_by_name() {
        let sink = RecordingEventSink::new();
        sink.emit(LifecycleEvent::ReportsFlushed { count: 1 });
        sink.emit(LifecycleEvent::RecoverySucceeded {
            operation: "decide".to_string(),
            attempts: 1,
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events_named("recovery.succeeded").len(), 1);
        sink.clear();
        assert!(sink.is_empty());
    }
}
