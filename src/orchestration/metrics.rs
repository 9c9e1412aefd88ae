//! Orchestrator counters. Every figure is an observed count; rates are
//! derived from counts at snapshot time.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct OrchestratorMetrics {
    decisions_started: AtomicU64,
    decisions_succeeded: AtomicU64,
    decisions_failed: AtomicU64,
    decisions_with_tools: AtomicU64,
    clarifications: AtomicU64,
    tool_invocations: AtomicU64,
    tool_failures: AtomicU64,
    retries: AtomicU64,
    restored_conversations: AtomicU64,
    interrupted_conversations: AtomicU64,
    persistence_failures: AtomicU64,
}

/// Point-in-time copy of [`OrchestratorMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorMetricsSnapshot {
    pub decisions_started: u64,
    pub decisions_succeeded: u64,
    pub decisions_failed: u64,
    pub decisions_with_tools: u64,
    pub clarifications: u64,
    pub tool_invocations: u64,
    pub tool_failures: u64,
    pub retries: u64,
    pub restored_conversations: u64,
    pub interrupted_conversations: u64,
    pub persistence_failures: u64,
    /// decisions_succeeded / (decisions_succeeded + decisions_failed)
    pub success_rate: f64,
    /// decisions_with_tools / decisions_succeeded
    pub tool_usage_rate: f64,
    /// tool_failures / tool_invocations
    pub tool_failure_rate: f64,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_started(&self) {
        self.decisions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_succeeded(&self, used_tools: bool, clarified: bool) {
        self.decisions_succeeded.fetch_add(1, Ordering::Relaxed);
        if used_tools {
            self.decisions_with_tools.fetch_add(1, Ordering::Relaxed);
        }
        if clarified {
            self.clarifications.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_failed(&self) {
        self.decisions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tool_invocation(&self, success: bool) {
        self.tool_invocations.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restored(&self, interrupted: bool) {
        self.restored_conversations.fetch_add(1, Ordering::Relaxed);
        if interrupted {
            self.interrupted_conversations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> OrchestratorMetricsSnapshot {
        let succeeded = self.decisions_succeeded.load(Ordering::Relaxed);
        let failed = self.decisions_failed.load(Ordering::Relaxed);
        let with_tools = self.decisions_with_tools.load(Ordering::Relaxed);
        let tool_invocations = self.tool_invocations.load(Ordering::Relaxed);
        let tool_failures = self.tool_failures.load(Ordering::Relaxed);

        OrchestratorMetricsSnapshot {
            decisions_started: self.decisions_started.load(Ordering::Relaxed),
            decisions_succeeded: succeeded,
            decisions_failed: failed,
            decisions_with_tools: with_tools,
            clarifications: self.clarifications.load(Ordering::Relaxed),
            tool_invocations,
            tool_failures,
            retries: self.retries.load(Ordering::Relaxed),
            restored_conversations: self.restored_conversations.load(Ordering::Relaxed),
            interrupted_conversations: self.interrupted_conversations.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            success_rate: ratio(succeeded, succeeded + failed),
            tool_usage_rate: ratio(with_tools, succeeded),
            tool_failure_rate: ratio(tool_failures, tool_invocations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_follow_counts() {
        let metrics = OrchestratorMetrics::new();
        assert_eq!(metrics.snapshot().success_rate, 0.0);

        metrics.record_succeeded(true, false);
        metrics.record_succeeded(false, true);
        metrics.record_succeeded(false, false);
        metrics.record_failed();
        metrics.record_tool_invocation(true);
        metrics.record_tool_invocation(false);

        let snapshot = metrics.snapshot();
        assert!((snapshot.success_rate - 0.75).abs() < f64::EPSILON);
        assert!((snapshot.tool_usage_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((snapshot.tool_failure_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.clarifications, 1);
    }
}
