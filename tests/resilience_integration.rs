//! Integration tests for circuit breakers working under the recovery service

use chatbot_core::config::{CircuitBreakerOverride, CircuitBreakerSettings};
use chatbot_core::events::{LifecycleEvent, RecordingEventSink};
use chatbot_core::recovery::{
    ErrorCategory, ErrorContext, ErrorHandler, ErrorRecoveryService, OperationError,
    RetryOptions, RetryPolicyResolver,
};
use chatbot_core::resilience::{CircuitBreakerManager, CircuitState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TOOL_KEY: &str = "tool_executor:search";

fn settings() -> CircuitBreakerSettings {
    CircuitBreakerSettings {
        failure_threshold: 5,
        recovery_timeout_ms: 60_000,
        half_open_max_calls: 1,
        component_overrides: HashMap::from([(
            "tool_executor".to_string(),
            CircuitBreakerOverride {
                failure_threshold: Some(3),
                ..CircuitBreakerOverride::default()
            },
        )]),
    }
}

fn service(sink: &RecordingEventSink) -> ErrorRecoveryService {
    ErrorRecoveryService::new(
        RetryPolicyResolver::new(),
        Arc::new(CircuitBreakerManager::new(settings(), Arc::new(sink.clone()))),
        Arc::new(sink.clone()),
    )
}

#[test]
fn test_component_override_applies_only_to_that_component() {
    let manager = CircuitBreakerManager::new(settings(), Arc::new(RecordingEventSink::new()));

    for _ in 0..3 {
        manager.record_failure(TOOL_KEY);
        manager.record_failure("decision_engine:decide");
    }

    assert!(manager.is_open(TOOL_KEY));
    assert!(!manager.is_open("decision_engine:decide"));
    assert_eq!(manager.status("decision_engine:decide").failure_count, 3);
    assert_eq!(
        manager.system_metrics().open_circuits(),
        vec![TOOL_KEY.to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_service_errors_trip_breaker_then_recover() {
    let sink = RecordingEventSink::new();
    let service = service(&sink);
    let calls = AtomicU32::new(0);

    let result: Result<(), OperationError> = service
        .execute_with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(OperationError::upstream("503 Service Unavailable"))
            },
            RetryOptions::new("search")
                .with_category(ErrorCategory::ServiceError)
                .with_circuit_key(TOOL_KEY),
        )
        .await;

    // three failures open the breaker; the fourth attempt is rejected
    assert!(matches!(result, Err(OperationError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(service.breakers().status(TOOL_KEY).state, CircuitState::Open);
    assert!(sink.events().contains(&LifecycleEvent::CircuitStateChanged {
        key: TOOL_KEY.to_string(),
        from: CircuitState::Closed,
        to: CircuitState::Open,
    }));

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(service.breakers().status(TOOL_KEY).state, CircuitState::HalfOpen);

    let recovered = service
        .execute_with_retry(
            || async { Ok::<_, OperationError>("results") },
            RetryOptions::new("search")
                .with_category(ErrorCategory::ServiceError)
                .with_circuit_key(TOOL_KEY),
        )
        .await;

    assert_eq!(recovered.unwrap(), "results");
    assert_eq!(service.breakers().status(TOOL_KEY).state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_network_failures_back_off_without_breaker() {
    let sink = RecordingEventSink::new();
    let service = service(&sink);
    let started = tokio::time::Instant::now();

    let result: Result<(), OperationError> = service
        .execute_with_retry(
            || async { Err(OperationError::upstream("read ETIMEDOUT")) },
            RetryOptions::new("decide"),
        )
        .await;

    assert!(matches!(result, Err(OperationError::Upstream(_))));
    // 1s + 2s + 4s of exponential backoff
    assert!(started.elapsed() >= Duration::from_secs(7));
    assert!(service.breakers().is_empty());

    let delays: Vec<u64> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            LifecycleEvent::RetryScheduled { delay_ms, .. } => Some(delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000]);
    assert_eq!(sink.events_named("recovery.failed").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handler_registry_is_independent_of_service_registry() {
    let sink = RecordingEventSink::new();
    let service = service(&sink);
    let handler = ErrorHandler::new(
        Default::default(),
        CircuitBreakerManager::new(settings(), Arc::new(sink.clone())),
        None,
        Arc::new(sink.clone()),
    );

    let _: Result<(), OperationError> = service
        .execute_with_retry(
            || async { Err(OperationError::upstream("502 bad gateway")) },
            RetryOptions::new("search")
                .with_category(ErrorCategory::ServiceError)
                .with_circuit_key(TOOL_KEY),
        )
        .await;
    assert!(service.breakers().is_open(TOOL_KEY));
    assert!(!handler.is_circuit_open("tool_executor", "search"));

    let context = ErrorContext::new("tool_executor", "search");
    let first = handler.handle_error(&OperationError::upstream("502 bad gateway"), &context);
    assert!(!first.circuit_open);
    assert_eq!(first.category, ErrorCategory::ServiceError);

    handler.handle_error(&OperationError::upstream("502 bad gateway"), &context);
    let third = handler.handle_error(&OperationError::upstream("502 bad gateway"), &context);
    assert!(third.circuit_open);
    assert!(handler.is_circuit_open("tool_executor", "search"));
}
