//! # Error Recovery Service
//!
//! Runs a caller-supplied async operation with categorize → resolve policy →
//! backoff → retry. Operations whose policy uses the circuit-breaker strategy
//! are routed through the shared breaker registry. Any attempt whose breaker
//! is already open fails fast, whatever its policy.
//!
//! The policy is recomputed after every failure from the category of the
//! error actually observed, so a caller's initial guess only decides how the
//! first attempt is invoked.

use super::{ErrorCategorizer, ErrorCategory, OperationError, RetryPolicy, RetryPolicyResolver};
use crate::events::{LifecycleEvent, NoopEventSink, SharedEventSink};
use crate::logging::log_recovery_operation;
use crate::resilience::CircuitBreakerManager;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type SuccessCallback = Box<dyn Fn(u32) + Send + Sync>;
type RetryCallback = Box<dyn Fn(&OperationError, u32, Duration) + Send + Sync>;
type FailureCallback = Box<dyn Fn(&OperationError, u32) + Send + Sync>;

/// Options for one `execute_with_retry` call
pub struct RetryOptions {
    pub operation_name: String,
    /// Expected category, used to pick the policy for the first attempt
    pub category_hint: Option<ErrorCategory>,
    /// Breaker key; defaults to the operation name
    pub circuit_key: Option<String>,
    on_success: Option<SuccessCallback>,
    on_retry: Option<RetryCallback>,
    on_failure: Option<FailureCallback>,
}

impl RetryOptions {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            category_hint: None,
            circuit_key: None,
            on_success: None,
            on_retry: None,
            on_failure: None,
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category_hint = Some(category);
        self
    }

    pub fn with_circuit_key(mut self, key: impl Into<String>) -> Self {
        self.circuit_key = Some(key.into());
        self
    }

    /// Called with the attempt number that succeeded
    pub fn on_success(mut self, callback: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Called with the error, the failed attempt number and the delay before the next one
    pub fn on_retry(
        mut self,
        callback: impl Fn(&OperationError, u32, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Box::new(callback));
        self
    }

    /// Called once with the final error and the number of attempts made
    pub fn on_failure(
        mut self,
        callback: impl Fn(&OperationError, u32) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }

    fn circuit_key(&self) -> &str {
        self.circuit_key.as_deref().unwrap_or(&self.operation_name)
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("operation_name", &self.operation_name)
            .field("category_hint", &self.category_hint)
            .field("circuit_key", &self.circuit_key)
            .finish_non_exhaustive()
    }
}

/// Retry orchestration around fallible async operations
#[derive(Debug)]
pub struct ErrorRecoveryService {
    categorizer: ErrorCategorizer,
    resolver: RetryPolicyResolver,
    breakers: Arc<CircuitBreakerManager>,
    events: SharedEventSink,
}

impl ErrorRecoveryService {
    pub fn new(
        resolver: RetryPolicyResolver,
        breakers: Arc<CircuitBreakerManager>,
        events: SharedEventSink,
    ) -> Self {
        Self {
            categorizer: ErrorCategorizer::new(),
            resolver,
            breakers,
            events,
        }
    }

    pub fn categorize(&self, error: &OperationError) -> ErrorCategory {
        self.categorizer.categorize(error)
    }

    pub fn resolver(&self) -> &RetryPolicyResolver {
        &self.resolver
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    /// Policy for `category`, honoring any override for `operation`
    pub fn policy_for(&self, category: ErrorCategory, operation: &str) -> RetryPolicy {
        self.resolver.resolve(category, Some(operation))
    }

    /// Run `operation` until it succeeds or its failure is not retryable.
    ///
    /// The final error is returned exactly as the operation produced it. The
    /// exception is a call rejected by an open circuit, which surfaces as
    /// [`OperationError::CircuitOpen`] and is never retried.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        mut operation: F,
        options: RetryOptions,
    ) -> Result<T, OperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let name = options.operation_name.as_str();
        let mut policy = self.resolver.resolve(
            options.category_hint.unwrap_or(ErrorCategory::Unknown),
            Some(name),
        );
        let mut attempt: u32 = 1;

        loop {
            let result = if policy.uses_circuit_breaker() {
                self.breakers
                    .call(options.circuit_key(), || operation())
                    .await
                    .map_err(OperationError::from)
            } else if self.breakers.is_open(options.circuit_key()) {
                // an open breaker rejects even attempts whose policy skips it
                Err(OperationError::CircuitOpen {
                    key: options.circuit_key().to_string(),
                })
            } else {
                operation().await
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation = name, attempts = attempt, "✅ Operation recovered after retry");
                    }
                    if let Some(callback) = &options.on_success {
                        callback(attempt);
                    }
                    self.events.emit(LifecycleEvent::RecoverySucceeded {
                        operation: name.to_string(),
                        attempts: attempt,
                    });
                    return Ok(value);
                }
                Err(error) => error,
            };

            let category = self.categorizer.categorize(&error);
            policy = self.resolver.resolve(category, Some(name));
            let retryable = !error.is_circuit_open()
                && category != ErrorCategory::InvalidRequest
                && policy.allows_retry(attempt);

            if !retryable {
                warn!(
                    operation = name,
                    attempts = attempt,
                    category = %category,
                    error = %error,
                    "❌ Operation failed; not retrying"
                );
                if let Some(callback) = &options.on_failure {
                    callback(&error, attempt);
                }
                log_recovery_operation(name, Some(category.as_str()), attempt, "exhausted", None);
                self.events.emit(LifecycleEvent::RecoveryFailed {
                    operation: name.to_string(),
                    attempts: attempt,
                    category,
                    message: error.to_string(),
                });
                return Err(error);
            }

            let delay = policy.delay_for_attempt(attempt);
            debug!(
                operation = name,
                max_attempts = policy.max_attempts,
                strategy = %policy.strategy,
                "🔁 Scheduling retry"
            );
            log_recovery_operation(
                name,
                Some(category.as_str()),
                attempt,
                "retry_scheduled",
                Some(delay.as_millis() as u64),
            );
            if let Some(callback) = &options.on_retry {
                callback(&error, attempt, delay);
            }
            self.events.emit(LifecycleEvent::RetryScheduled {
                operation: name.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                category,
            });

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

impl Default for ErrorRecoveryService {
    fn default() -> Self {
        Self::new(
            RetryPolicyResolver::new(),
            Arc::new(CircuitBreakerManager::default()),
            Arc::new(NoopEventSink),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use crate::recovery::RetryStrategy;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn service_with_sink() -> (ErrorRecoveryService, RecordingEventSink) {
        let sink = RecordingEventSink::new();
        let service = ErrorRecoveryService::new(
            RetryPolicyResolver::new(),
            Arc::new(CircuitBreakerManager::default()),
            Arc::new(sink.clone()),
        );
        (service, sink)
    }

    #[tokio::test]
    async fn test_first_try_success() {
        let (service, sink) = service_with_sink();
        let result = service
            .execute_with_retry(|| async { Ok::<_, OperationError>(42) }, RetryOptions::new("decide"))
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            sink.events(),
            vec![LifecycleEvent::RecoverySucceeded {
                operation: "decide".to_string(),
                attempts: 1
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_exhausts_after_three_retries() {
        let (service, sink) = service_with_sink();
        let calls = Arc::new(AtomicU32::new(0));
        let retries = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let retry_counter = Arc::clone(&retries);

        let result: Result<(), _> = service
            .execute_with_retry(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(OperationError::upstream("connect ECONNREFUSED 10.0.0.1:443")) }
                },
                RetryOptions::new("decide")
                    .on_retry(move |_, _, _| {
                        retry_counter.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .await;

        let error = result.unwrap_err();
        assert!(matches!(&error, OperationError::Upstream(msg) if msg == "connect ECONNREFUSED 10.0.0.1:443"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(retries.load(Ordering::SeqCst), 3);

        let delays: Vec<u64> = sink
            .events_named("recovery.retry_scheduled")
            .into_iter()
            .filter_map(|event| match event {
                LifecycleEvent::RetryScheduled { delay_ms, .. } => Some(delay_ms),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000]);
        assert_eq!(sink.events_named("recovery.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_not_retried() {
        let (service, _sink) = service_with_sink();
        let calls = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let failure_counter = Arc::clone(&failures);

        let result: Result<(), _> = service
            .execute_with_retry(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(OperationError::upstream("400 Bad Request: invalid tool schema")) }
                },
                RetryOptions::new("decide")
                    .with_category(ErrorCategory::NetworkError)
                    .on_failure(move |_, attempts| {
                        failure_counter.store(attempts, Ordering::SeqCst);
                    }),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let (service, sink) = service_with_sink();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = service
            .execute_with_retry(
                || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(OperationError::upstream("HTTP 429 rate limit"))
                        } else {
                            Ok("answer")
                        }
                    }
                },
                RetryOptions::new("decide"),
            )
            .await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(
            sink.events_named("recovery.succeeded"),
            vec![LifecycleEvent::RecoverySucceeded {
                operation: "decide".to_string(),
                attempts: 2
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_errors_trip_breaker_and_stop() {
        let resolver = {
            let mut resolver = RetryPolicyResolver::new();
            resolver.set_override(
                "generate",
                RetryPolicy::new(5, RetryStrategy::CircuitBreaker, 10, 10),
            );
            resolver
        };
        let breakers = Arc::new(CircuitBreakerManager::with_config(
            crate::resilience::CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        ));
        let service =
            ErrorRecoveryService::new(resolver, Arc::clone(&breakers), Arc::new(NoopEventSink));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = service
            .execute_with_retry(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(OperationError::upstream("503 service unavailable")) }
                },
                RetryOptions::new("generate")
                    .with_category(ErrorCategory::ServiceError)
                    .with_circuit_key("response_generator:generate"),
            )
            .await;

        assert!(matches!(result, Err(OperationError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(breakers.is_open("response_generator:generate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_rejects_unhinted_first_attempt() {
        let breakers = Arc::new(CircuitBreakerManager::with_config(
            crate::resilience::CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        ));
        breakers.record_failure("decision_engine:decide");
        let service = ErrorRecoveryService::new(
            RetryPolicyResolver::new(),
            Arc::clone(&breakers),
            Arc::new(NoopEventSink),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = service
            .execute_with_retry(
                || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
                RetryOptions::new("decide").with_circuit_key("decision_engine:decide"),
            )
            .await;

        assert!(matches!(result, Err(OperationError::CircuitOpen { key }) if key == "decision_engine:decide"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
