//! # Circuit Breaker Manager
//!
//! Registry of circuit breakers keyed by dependency string (typically
//! `component:operation`). The registry owns every breaker record; callers
//! only see statuses and metrics.
//!
//! Breakers are created lazily on the first failure reported for a key. A key
//! that has never failed reports a Closed status without allocating anything.

use super::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics,
    CircuitBreakerStatus, SystemCircuitBreakerMetrics,
};
use crate::config::CircuitBreakerSettings;
use crate::events::{NoopEventSink, SharedEventSink};
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Manager for circuit breakers across dependencies
#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    settings: CircuitBreakerSettings,
    events: SharedEventSink,
}

impl CircuitBreakerManager {
    /// Create a manager that applies `settings` (defaults plus per-key overrides)
    pub fn new(settings: CircuitBreakerSettings, events: SharedEventSink) -> Self {
        info!(
            failure_threshold = settings.failure_threshold,
            recovery_timeout_ms = settings.recovery_timeout_ms,
            overrides = settings.component_overrides.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            breakers: DashMap::new(),
            settings,
            events,
        }
    }

    /// Manager using one configuration for every key
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self::new(
            CircuitBreakerSettings::from_config(&config),
            Arc::new(NoopEventSink),
        )
    }

    /// Configuration the breaker for `key` uses (or would use)
    pub fn config_for(&self, key: &str) -> CircuitBreakerConfig {
        self.settings.config_for(key)
    }

    /// Existing breaker for `key`, if it has ever failed
    pub fn get(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Get or create the breaker for `key`
    pub fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(key) {
            return existing;
        }

        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key = key, "Created circuit breaker");
                Arc::new(CircuitBreaker::with_events(
                    key,
                    self.settings.config_for(key),
                    Arc::clone(&self.events),
                ))
            })
            .value()
            .clone()
    }

    /// Status for `key`; Closed with zero failures if no breaker exists
    pub fn status(&self, key: &str) -> CircuitBreakerStatus {
        self.get(key)
            .map(|breaker| breaker.status())
            .unwrap_or_else(|| CircuitBreakerStatus::closed(key))
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.status(key).is_open()
    }

    /// Run `operation` behind the breaker for `key`
    pub async fn call<F, Fut, T, E>(
        &self,
        key: &str,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get(key) {
            Some(breaker) => breaker.call(operation).await,
            None => match operation().await {
                Ok(value) => Ok(value),
                Err(err) => {
                    self.record_failure(key);
                    Err(CircuitBreakerError::OperationFailed(err))
                }
            },
        }
    }

    pub fn record_success(&self, key: &str) {
        if let Some(breaker) = self.get(key) {
            breaker.record_success();
        }
    }

    pub fn record_failure(&self, key: &str) {
        self.breaker(key).record_failure();
    }

    /// Force `key` closed; returns false when no breaker existed
    pub fn reset(&self, key: &str) -> bool {
        match self.get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for breaker in &breakers {
            breaker.reset();
        }
        info!(count = breakers.len(), "🔄 Reset all circuit breakers");
    }

    /// Drop the breaker for `key` entirely
    pub fn remove(&self, key: &str) -> bool {
        self.breakers.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    pub fn metrics(&self, key: &str) -> Option<CircuitBreakerMetrics> {
        self.get(key).map(|breaker| breaker.metrics())
    }

    /// Metrics for every registered breaker
    pub fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let snapshot: HashMap<String, CircuitBreakerMetrics> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect();

        let mut system = SystemCircuitBreakerMetrics::new();
        for (key, metrics) in snapshot {
            system.add_circuit_breaker(key, metrics);
        }
        system
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerSettings::default(), Arc::new(NoopEventSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use std::time::Duration;

    fn manager(threshold: u32) -> CircuitBreakerManager {
        CircuitBreakerManager::with_config(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(100),
            half_open_max_calls: 1,
        })
    }

    #[test]
    fn test_unknown_key_is_closed_without_allocation() {
        let manager = manager(2);
        let status = manager.status("llm:decide");
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert!(manager.is_empty());

        manager.record_success("llm:decide");
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_breaker_created_on_first_failure() {
        let manager = manager(2);

        let ok = manager
            .call("tools:search", || async { Ok::<_, String>(1) })
            .await;
        assert!(ok.is_ok());
        assert!(manager.is_empty());

        let err = manager
            .call("tools:search", || async { Err::<(), _>("boom".to_string()) })
            .await;
        assert!(matches!(err, Err(CircuitBreakerError::OperationFailed(_))));
        assert_eq!(manager.keys(), vec!["tools:search".to_string()]);
        assert_eq!(manager.status("tools:search").failure_count, 1);

        manager.record_failure("tools:search");
        assert!(manager.is_open("tools:search"));
        assert!(!manager.is_open("tools:other"));
    }

    #[test]
    fn test_reset_and_system_metrics() {
        let manager = manager(1);
        manager.record_failure("a:x");
        manager.record_failure("b:y");

        let system = manager.system_metrics();
        assert_eq!(system.open_circuits(), vec!["a:x".to_string(), "b:y".to_string()]);

        assert!(manager.reset("a:x"));
        assert!(!manager.reset("missing"));
        assert_eq!(manager.system_metrics().open_circuits(), vec!["b:y".to_string()]);

        manager.reset_all();
        assert!(manager.system_metrics().is_healthy());

        assert!(manager.remove("a:x"));
        assert_eq!(manager.len(), 1);
    }
}
