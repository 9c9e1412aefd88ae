//! # Circuit Breaker Implementation
//!
//! Per-dependency failure tripwire with three states: Closed (normal
//! operation), Open (failing fast) and Half-Open (probing recovery).
//!
//! The Open → Half-Open move is lazy: it happens on the first status check or
//! call after the recovery deadline, never on a timer. A half-open trial call whose
//! future is dropped before it resolves counts as a failure. All record mutations
//! for one breaker happen under a single lock, so concurrent failures from
//! different conversations hitting the same dependency are counted exactly.

use super::{CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::events::{LifecycleEvent, NoopEventSink, SharedEventSink};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - limited probe calls allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {key}")]
    CircuitOpen {
        key: String,
        retry_in: Option<Duration>,
    },

    /// Operation ran and failed; the failure was recorded
    #[error("{0}")]
    OperationFailed(E),
}

/// Point-in-time view of a breaker's record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_retry_time: Option<DateTime<Utc>>,
    pub half_open_probe_count: u32,
}

impl CircuitBreakerStatus {
    /// Status of a dependency that has never failed
    pub fn closed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            next_retry_time: None,
            half_open_probe_count: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

#[derive(Debug)]
struct BreakerRecord {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_retry_time: Option<DateTime<Utc>>,
    reopen_deadline: Option<Instant>,
    half_open_probe_count: u32,
    metrics: CircuitBreakerMetrics,
}

impl BreakerRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            next_retry_time: None,
            reopen_deadline: None,
            half_open_probe_count: 0,
            metrics: CircuitBreakerMetrics::new(),
        }
    }

    fn set_state(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.metrics.state_changes += 1;
        Some((from, to))
    }

    /// Lazily move Open → HalfOpen once the recovery deadline has passed
    fn refresh(&mut self, now: Instant) -> Option<(CircuitState, CircuitState)> {
        match (self.state, self.reopen_deadline) {
            (CircuitState::Open, Some(deadline)) if now > deadline => {
                self.half_open_probe_count = 0;
                self.set_state(CircuitState::HalfOpen)
            }
            _ => None,
        }
    }

    fn open(&mut self, timeout: Duration, now: Instant) -> Option<(CircuitState, CircuitState)> {
        self.reopen_deadline = Some(now + timeout);
        self.next_retry_time = chrono::Duration::from_std(timeout)
            .ok()
            .map(|timeout| Utc::now() + timeout);
        self.half_open_probe_count = 0;
        self.set_state(CircuitState::Open)
    }

    fn close(&mut self) -> Option<(CircuitState, CircuitState)> {
        self.failure_count = 0;
        self.half_open_probe_count = 0;
        self.reopen_deadline = None;
        self.next_retry_time = None;
        self.set_state(CircuitState::Closed)
    }

    fn status(&self, key: &str) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            key: key.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            last_failure_time: self.last_failure_time,
            next_retry_time: self.next_retry_time,
            half_open_probe_count: self.half_open_probe_count,
        }
    }
}

/// Circuit breaker guarding one dependency key
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    record: Mutex<BreakerRecord>,
    events: SharedEventSink,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("state", &self.record.lock().state)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given key and configuration
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_events(key, config, Arc::new(NoopEventSink))
    }

    pub fn with_events(
        key: impl Into<String>,
        config: CircuitBreakerConfig,
        events: SharedEventSink,
    ) -> Self {
        let key = key.into();
        debug!(
            key = %key,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            key,
            config,
            record: Mutex::new(BreakerRecord::new()),
            events,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current status, applying the lazy Open → HalfOpen move first
    pub fn status(&self) -> CircuitBreakerStatus {
        let (status, change) = {
            let mut record = self.record.lock();
            let change = record.refresh(Instant::now());
            (record.status(&self.key), change)
        };
        self.announce(change);
        status
    }

    pub fn state(&self) -> CircuitState {
        self.status().state
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = TrialSlot {
            breaker: self,
            armed: self.admit::<E>()? == Admission::Trial,
        };
        let result = operation().await;
        trial.disarm();

        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    /// Admit or reject one call without running anything
    pub fn try_acquire<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        self.admit().map(|_| ())
    }

    fn admit<E>(&self) -> Result<Admission, CircuitBreakerError<E>> {
        let now = Instant::now();
        let (admission, retry_in, change) = {
            let mut record = self.record.lock();
            let change = record.refresh(now);
            let admission = match record.state {
                CircuitState::Closed => Some(Admission::Normal),
                CircuitState::Open => None,
                CircuitState::HalfOpen => {
                    if record.half_open_probe_count < self.config.half_open_max_calls {
                        record.half_open_probe_count += 1;
                        Some(Admission::Trial)
                    } else {
                        None
                    }
                }
            };
            if admission.is_none() {
                record.metrics.rejected_calls += 1;
            }
            let retry_in = record
                .reopen_deadline
                .map(|deadline| deadline.saturating_duration_since(now));
            (admission, retry_in, change)
        };
        self.announce(change);

        if let Some(admission) = admission {
            Ok(admission)
        } else {
            debug!(key = %self.key, "⛔ Call rejected by open circuit");
            Err(CircuitBreakerError::CircuitOpen {
                key: self.key.clone(),
                retry_in,
            })
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let change = {
            let mut record = self.record.lock();
            record.metrics.total_calls += 1;
            record.metrics.success_count += 1;
            match record.state {
                CircuitState::Closed => {
                    record.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => record.close(),
                CircuitState::Open => {
                    warn!(key = %self.key, "Success recorded while circuit is open");
                    None
                }
            }
        };

        if change.is_some() {
            info!(key = %self.key, "🟢 Circuit breaker closed (recovered)");
        }
        self.announce(change);
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let now = Instant::now();
        let (change, failures) = {
            let mut record = self.record.lock();
            record.metrics.total_calls += 1;
            record.metrics.failure_count += 1;
            record.failure_count = record.failure_count.saturating_add(1);
            record.last_failure_time = Some(Utc::now());

            let change = match record.state {
                CircuitState::Closed if record.failure_count >= self.config.failure_threshold => {
                    record.open(self.config.recovery_timeout, now)
                }
                // any failed probe re-opens with a fresh deadline
                CircuitState::HalfOpen => record.open(self.config.recovery_timeout, now),
                _ => None,
            };
            (change, record.failure_count)
        };

        if change.is_some() {
            error!(
                key = %self.key,
                failure_count = failures,
                failure_threshold = self.config.failure_threshold,
                recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                "🔴 Circuit breaker opened (failing fast)"
            );
        } else {
            debug!(key = %self.key, failure_count = failures, "Failure recorded");
        }
        self.announce(change);
    }

    /// Force the circuit closed with zero failures
    pub fn reset(&self) {
        let change = self.record.lock().close();
        info!(key = %self.key, "🔄 Circuit breaker reset");
        self.announce(change);
    }

    /// Force the circuit open (emergency stop)
    pub fn force_open(&self) {
        let change = self
            .record
            .lock()
            .open(self.config.recovery_timeout, Instant::now());
        warn!(key = %self.key, "🚨 Circuit breaker forced open");
        self.announce(change);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let record = self.record.lock();
        let mut snapshot = record.metrics.clone();
        snapshot.current_state = record.state;
        snapshot.refresh_rates();
        snapshot
    }

    fn announce(&self, change: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = change {
            if to == CircuitState::HalfOpen {
                info!(key = %self.key, "🟡 Circuit breaker half-open (testing recovery)");
            }
            self.events.emit(LifecycleEvent::CircuitStateChanged {
                key: self.key.clone(),
                from,
                to,
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Holds a half-open trial slot until the call resolves
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl TrialSlot<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(key = %self.breaker.key, "Half-open trial call abandoned before completing");
            self.breaker.record_failure();
        }
    }
}
