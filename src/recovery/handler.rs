//! # Error Handler
//!
//! Composition point for failures that escaped the retry loop. Produces the
//! user-facing message for a category, keeps its own breaker registry keyed
//! by `component:operation`, queues an error report, and raises a
//! pattern-detected event when the same failure signature keeps recurring.
//!
//! Signature counts are windowed: a signature unseen for `pattern_window_secs`
//! starts over, and the map holds at most `max_tracked_patterns` entries.

use super::reporting::{ErrorReport, ErrorReporter, ReportContext};
use super::{ErrorCategorizer, ErrorCategory, OperationError, RetryPolicy};
use crate::config::ErrorHandlerSettings;
use crate::constants::dependency_key;
use crate::events::{LifecycleEvent, NoopEventSink, SharedEventSink};
use crate::resilience::CircuitBreakerManager;
use crate::state_machine::ConversationId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Where a failure happened
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub conversation_id: Option<ConversationId>,
    pub metadata: Value,
}

impl ErrorContext {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            conversation_id: None,
            metadata: Value::Null,
        }
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn dependency_key(&self) -> String {
        dependency_key(&self.component, &self.operation)
    }
}

/// Outcome of handling one error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandledError {
    pub handled: bool,
    pub should_retry: bool,
    pub circuit_open: bool,
    pub category: ErrorCategory,
    pub user_message: String,
    pub report_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy)]
struct PatternRecord {
    occurrences: u64,
    last_seen: Instant,
}

pub struct ErrorHandler {
    categorizer: ErrorCategorizer,
    breakers: CircuitBreakerManager,
    settings: ErrorHandlerSettings,
    reporter: Option<Arc<ErrorReporter>>,
    patterns: DashMap<String, PatternRecord>,
    events: SharedEventSink,
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("breakers", &self.breakers.len())
            .field("patterns", &self.patterns.len())
            .field("reporting", &self.reporter.is_some())
            .finish()
    }
}

impl ErrorHandler {
    pub fn new(
        settings: ErrorHandlerSettings,
        breakers: CircuitBreakerManager,
        reporter: Option<Arc<ErrorReporter>>,
        events: SharedEventSink,
    ) -> Self {
        Self {
            categorizer: ErrorCategorizer::new(),
            breakers,
            settings,
            reporter,
            patterns: DashMap::new(),
            events,
        }
    }

    /// User-facing message for a category
    pub fn message_for(&self, category: ErrorCategory) -> &str {
        self.settings
            .category_messages
            .get(&category)
            .map(String::as_str)
            .unwrap_or(&self.settings.default_message)
    }

    pub fn handle_error(&self, error: &OperationError, context: &ErrorContext) -> HandledError {
        let key = context.dependency_key();

        let (category, outcome) = if error.is_circuit_open() || self.breakers.is_open(&key) {
            let category = ErrorCategory::ServiceError;
            (
                category,
                HandledError {
                    handled: true,
                    should_retry: false,
                    circuit_open: true,
                    category,
                    user_message: self.settings.circuit_open_message.clone(),
                    report_id: None,
                },
            )
        } else {
            let category = self.categorizer.categorize(error);
            self.breakers.record_failure(&key);
            let circuit_open = self.breakers.is_open(&key);
            (
                category,
                HandledError {
                    handled: true,
                    should_retry: !circuit_open
                        && RetryPolicy::default_for(category).max_attempts > 0,
                    circuit_open,
                    category,
                    user_message: self.message_for(category).to_string(),
                    report_id: None,
                },
            )
        };

        warn!(
            component = %context.component,
            operation = %context.operation,
            conversation_id = context.conversation_id.as_ref().map(|id| id.as_str()),
            category = %category,
            circuit_open = outcome.circuit_open,
            error = %error,
            "⚠️ Error handled"
        );

        let report_id = self.report(error, category, context);
        self.track_pattern(&context.component, category, &error.to_string());

        self.events.emit(LifecycleEvent::ErrorHandled {
            component: context.component.clone(),
            operation: context.operation.clone(),
            category,
            should_retry: outcome.should_retry,
            circuit_open: outcome.circuit_open,
        });

        HandledError {
            report_id,
            ..outcome
        }
    }

    /// Record a success for `component:operation`, closing a half-open breaker
    pub fn record_success(&self, component: &str, operation: &str) {
        self.breakers
            .record_success(&dependency_key(component, operation));
    }

    pub fn is_circuit_open(&self, component: &str, operation: &str) -> bool {
        self.breakers.is_open(&dependency_key(component, operation))
    }

    pub fn reset_circuit(&self, component: &str, operation: &str) -> bool {
        self.breakers.reset(&dependency_key(component, operation))
    }

    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    pub fn reporter(&self) -> Option<&Arc<ErrorReporter>> {
        self.reporter.as_ref()
    }

    /// Occurrence counts per failure signature, most frequent first
    pub fn error_patterns(&self) -> Vec<(String, u64)> {
        let mut patterns: Vec<(String, u64)> = self
            .patterns
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().occurrences))
            .collect();
        patterns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        patterns
    }

    pub fn clear_patterns(&self) {
        self.patterns.clear();
    }

    /// Forget signatures not seen within the pattern window; returns how many
    pub fn prune_patterns(&self) -> usize {
        let window = self.settings.pattern_window();
        let now = Instant::now();
        let before = self.patterns.len();
        self.patterns
            .retain(|_, record| now.duration_since(record.last_seen) <= window);
        let pruned = before.saturating_sub(self.patterns.len());
        if pruned > 0 {
            debug!(pruned = pruned, "Pruned stale error signatures");
        }
        pruned
    }

    fn report(
        &self,
        error: &OperationError,
        category: ErrorCategory,
        context: &ErrorContext,
    ) -> Option<Uuid> {
        let reporter = self.reporter.as_ref()?;
        let report = ErrorReport::new(
            error,
            category,
            ReportContext {
                operation: context.operation.clone(),
                component: context.component.clone(),
                conversation_id: context.conversation_id.clone(),
                metadata: context.metadata.clone(),
            },
            reporter.environment().clone(),
        );
        let id = report.id;
        reporter.enqueue(report).then_some(id)
    }

    fn track_pattern(&self, component: &str, category: ErrorCategory, message: &str) {
        let prefix: String = message.chars().take(self.settings.message_prefix_len).collect();
        let signature = format!("{component}:{category}:{prefix}");

        let now = Instant::now();
        if !self.patterns.contains_key(&signature)
            && self.patterns.len() >= self.settings.max_tracked_patterns.max(1)
        {
            self.evict_least_recent_pattern();
        }

        let window = self.settings.pattern_window();
        let occurrences = {
            let mut record = self.patterns.entry(signature.clone()).or_insert(PatternRecord {
                occurrences: 0,
                last_seen: now,
            });
            if now.duration_since(record.last_seen) > window {
                record.occurrences = 0;
            }
            record.occurrences += 1;
            record.last_seen = now;
            record.occurrences
        };

        let threshold = self.settings.pattern_threshold.max(1);
        if occurrences % threshold == 0 {
            warn!(
                signature = %signature,
                occurrences = occurrences,
                "🔍 Recurring error pattern detected"
            );
            self.events.emit(LifecycleEvent::ErrorPatternDetected {
                signature,
                occurrences,
            });
        } else {
            debug!(signature = %signature, occurrences = occurrences, "Error signature recorded");
        }
    }

    fn evict_least_recent_pattern(&self) {
        let oldest = self
            .patterns
            .iter()
            .min_by_key(|entry| entry.value().last_seen)
            .map(|entry| entry.key().clone());
        if let Some(signature) = oldest {
            self.patterns.remove(&signature);
        }
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(
            ErrorHandlerSettings::default(),
            CircuitBreakerManager::default(),
            None,
            Arc::new(NoopEventSink),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReportingSettings;
    use crate::events::RecordingEventSink;
    use crate::recovery::LogErrorReportSink;
    use crate::resilience::CircuitBreakerConfig;
    use std::time::Duration;

    fn handler(threshold: u32, sink: &RecordingEventSink) -> ErrorHandler {
        let reporter = ErrorReporter::new(
            &ReportingSettings::default(),
            "test",
            Arc::new(LogErrorReportSink),
            Arc::new(NoopEventSink),
        );
        ErrorHandler::new(
            ErrorHandlerSettings::default(),
            CircuitBreakerManager::with_config(CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            }),
            Some(Arc::new(reporter)),
            Arc::new(sink.clone()),
        )
    }

    #[test]
    fn test_category_message_lookup() {
        let sink = RecordingEventSink::new();
        let handler = handler(5, &sink);
        let context = ErrorContext::new("decision_engine", "decide")
            .with_conversation(ConversationId::from(42i64));

        let result = handler.handle_error(&OperationError::upstream("HTTP 429 rate limit"), &context);
        assert!(result.handled);
        assert!(result.should_retry);
        assert!(!result.circuit_open);
        assert_eq!(result.category, ErrorCategory::RateLimit);
        assert_eq!(result.user_message, handler.message_for(ErrorCategory::RateLimit));
        assert!(result.report_id.is_some());
        assert_eq!(handler.reporter().map(|r| r.queue_len()), Some(1));

        let invalid = handler.handle_error(&OperationError::upstream("validation failed"), &context);
        assert!(!invalid.should_retry);
        assert_eq!(sink.events_named("error.handled").len(), 2);
    }

    #[test]
    fn test_open_circuit_short_circuits() {
        let sink = RecordingEventSink::new();
        let handler = handler(2, &sink);
        let context = ErrorContext::new("tool_executor", "execute_tool");
        let error = OperationError::upstream("502 bad gateway");

        handler.handle_error(&error, &context);
        let second = handler.handle_error(&error, &context);
        assert!(second.circuit_open);
        assert!(handler.is_circuit_open("tool_executor", "execute_tool"));

        let third = handler.handle_error(&error, &context);
        assert!(third.handled);
        assert!(!third.should_retry);
        assert!(third.circuit_open);
        assert_eq!(third.user_message, ErrorHandlerSettings::default().circuit_open_message);

        assert!(handler.reset_circuit("tool_executor", "execute_tool"));
        assert!(!handler.is_circuit_open("tool_executor", "execute_tool"));
    }

    #[test]
    fn test_pattern_detection() {
        let sink = RecordingEventSink::new();
        let handler = handler(100, &sink);
        let context = ErrorContext::new("decision_engine", "decide");

        for _ in 0..3 {
            handler.handle_error(&OperationError::upstream("something odd happened"), &context);
        }

        let detected = sink.events_named("error.pattern_detected");
        assert_eq!(detected.len(), 1);
        assert_eq!(
            detected[0],
            LifecycleEvent::ErrorPatternDetected {
                signature: "decision_engine:UNKNOWN:something odd happened".to_string(),
                occurrences: 3,
            }
        );
        assert_eq!(handler.error_patterns()[0].1, 3);
    }

    #[test]
    fn test_distinct_signatures_are_capped() {
        let sink = RecordingEventSink::new();
        let handler = ErrorHandler::new(
            ErrorHandlerSettings {
                max_tracked_patterns: 100,
                ..ErrorHandlerSettings::default()
            },
            CircuitBreakerManager::default(),
            None,
            Arc::new(sink.clone()),
        );
        let context = ErrorContext::new("decision_engine", "decide");

        for i in 0..5_000 {
            handler.handle_error(&OperationError::upstream(format!("req {i} failed")), &context);
        }

        let patterns = handler.error_patterns();
        assert_eq!(patterns.len(), 100);
        assert!(patterns
            .iter()
            .any(|(signature, _)| signature.ends_with("req 4999 failed")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_signatures_are_pruned_and_restart() {
        let sink = RecordingEventSink::new();
        let handler = ErrorHandler::new(
            ErrorHandlerSettings {
                pattern_window_secs: 60,
                ..ErrorHandlerSettings::default()
            },
            CircuitBreakerManager::default(),
            None,
            Arc::new(sink.clone()),
        );
        let context = ErrorContext::new("decision_engine", "decide");
        let error = OperationError::upstream("something odd happened");

        handler.handle_error(&error, &context);
        handler.handle_error(&error, &context);
        tokio::time::advance(Duration::from_secs(61)).await;

        // the window lapsed, so the third occurrence counts as the first
        handler.handle_error(&error, &context);
        assert_eq!(handler.error_patterns()[0].1, 1);
        assert!(sink.events_named("error.pattern_detected").is_empty());

        handler.handle_error(&OperationError::upstream("another failure"), &context);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(handler.prune_patterns(), 2);
        assert!(handler.error_patterns().is_empty());
    }
}
