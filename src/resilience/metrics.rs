//! # Circuit Breaker Metrics
//!
//! Counters for a single breaker and a system-wide aggregate used by the
//! orchestrator's health output.

use super::circuit_breaker::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that reached the protected operation
    pub total_calls: u64,

    pub success_count: u64,

    pub failure_count: u64,

    /// Calls rejected without running because the circuit was open
    pub rejected_calls: u64,

    /// Number of state changes since creation
    pub state_changes: u64,

    pub current_state: CircuitState,

    /// failure_count / total_calls (0.0 when no calls)
    pub failure_rate: f64,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_calls: 0,
            state_changes: 0,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
        }
    }

    pub(crate) fn refresh_rates(&mut self) {
        self.failure_rate = if self.total_calls > 0 {
            self.failure_count as f64 / self.total_calls as f64
        } else {
            0.0
        };
    }

    /// Human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Probing dependency health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Failures: {} | Rejected: {} | Failure rate: {:.1}%",
            self.state_description(),
            self.total_calls,
            self.failure_count,
            self.rejected_calls,
            self.failure_rate * 100.0
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn add_circuit_breaker(&mut self, key: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(key, metrics);
    }

    /// Keys of breakers that are currently open
    pub fn open_circuits(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .circuit_breakers
            .iter()
            .filter(|(_, metrics)| metrics.current_state == CircuitState::Open)
            .map(|(key, _)| key.clone())
            .collect();
        open.sort();
        open
    }

    /// True when no breaker is open
    pub fn is_healthy(&self) -> bool {
        self.open_circuits().is_empty()
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_rate() {
        let mut metrics = CircuitBreakerMetrics::new();
        metrics.total_calls = 4;
        metrics.failure_count = 1;
        metrics.refresh_rates();
        assert!((metrics.failure_rate - 0.25).abs() < f64::EPSILON);
        assert!(metrics.format_summary().contains("25.0%"));
    }

    #[test]
    fn test_system_metrics_open_circuits() {
        let mut system = SystemCircuitBreakerMetrics::new();
        let open = CircuitBreakerMetrics {
            current_state: CircuitState::Open,
            ..Default::default()
        };
        system.add_circuit_breaker("llm:decide".to_string(), open);
        system.add_circuit_breaker("tools:run".to_string(), CircuitBreakerMetrics::new());

        assert_eq!(system.open_circuits(), vec!["llm:decide".to_string()]);
        assert!(!system.is_healthy());
    }
}
