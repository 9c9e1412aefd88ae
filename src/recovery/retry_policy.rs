//! # Retry Policies
//!
//! Per-category default policies and per-operation overrides. A policy is a
//! pure value: the delay before attempt `n` depends only on the policy and `n`.

use super::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Backoff shape between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Retry with no delay
    Immediate,
    /// `initial * n`, capped
    LinearBackoff,
    /// `initial * 2^(n-1)`, capped
    ExponentialBackoff,
    /// Linear backoff with each attempt routed through a circuit breaker
    CircuitBreaker,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::LinearBackoff => write!(f, "linear_backoff"),
            Self::ExponentialBackoff => write!(f, "exponential_backoff"),
            Self::CircuitBreaker => write!(f, "circuit_breaker"),
        }
    }
}

/// Resolved retry policy for one category or operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(
        max_attempts: u32,
        strategy: RetryStrategy,
        initial_delay_ms: u64,
        max_delay_ms: u64,
    ) -> Self {
        Self {
            max_attempts,
            strategy,
            initial_delay_ms,
            max_delay_ms,
        }
    }

    /// Policy that never retries
    pub const fn no_retry() -> Self {
        Self::new(0, RetryStrategy::Immediate, 0, 0)
    }

    /// Built-in default for a category
    pub const fn default_for(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::NetworkError => {
                Self::new(3, RetryStrategy::ExponentialBackoff, 1_000, 10_000)
            }
            ErrorCategory::RateLimit => {
                Self::new(5, RetryStrategy::ExponentialBackoff, 2_000, 30_000)
            }
            ErrorCategory::InvalidRequest => Self::no_retry(),
            ErrorCategory::ServiceError => {
                Self::new(3, RetryStrategy::CircuitBreaker, 1_000, 5_000)
            }
            ErrorCategory::Unknown => Self::new(1, RetryStrategy::LinearBackoff, 1_000, 5_000),
        }
    }

    /// Whether a failure on attempt `attempt` (1-indexed) may be retried
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let n = u64::from(attempt.max(1));
        let millis = match self.strategy {
            RetryStrategy::Immediate => 0,
            RetryStrategy::LinearBackoff | RetryStrategy::CircuitBreaker => {
                self.initial_delay_ms.saturating_mul(n)
            }
            RetryStrategy::ExponentialBackoff => {
                let factor = 1u64.checked_shl((n - 1) as u32).unwrap_or(u64::MAX);
                self.initial_delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(millis.min(self.max_delay_ms))
    }

    pub fn uses_circuit_breaker(&self) -> bool {
        self.strategy == RetryStrategy::CircuitBreaker
    }
}

/// Resolves the policy for an (operation, category) pair
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyResolver {
    operation_overrides: HashMap<String, RetryPolicy>,
}

impl RetryPolicyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(operation_overrides: HashMap<String, RetryPolicy>) -> Self {
        Self {
            operation_overrides,
        }
    }

    pub fn set_override(&mut self, operation: impl Into<String>, policy: RetryPolicy) {
        self.operation_overrides.insert(operation.into(), policy);
    }

    pub fn override_for(&self, operation: &str) -> Option<&RetryPolicy> {
        self.operation_overrides.get(operation)
    }

    /// Operation overrides win over category defaults, except that invalid
    /// requests are never retried.
    pub fn resolve(&self, category: ErrorCategory, operation: Option<&str>) -> RetryPolicy {
        if category == ErrorCategory::InvalidRequest {
            return RetryPolicy::no_retry();
        }

        match operation.and_then(|name| self.operation_overrides.get(name)) {
            Some(policy) => {
                debug!(
                    operation = operation.unwrap_or_default(),
                    category = %category,
                    "Using operation retry override"
                );
                *policy
            }
            None => RetryPolicy::default_for(category),
        }
    }
}
