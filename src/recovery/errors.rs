use crate::resilience::CircuitBreakerError;
use std::time::Duration;
use thiserror::Error;

/// Failures returned by collaborator operations.
///
/// These are ordinary recoverable results: the recovery service categorizes
/// them by message and retries per policy.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Circuit breaker is open for {key}")]
    CircuitOpen { key: String },

    #[error("Operation {operation} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Tool {tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OperationError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Short name used in error reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "CircuitOpen",
            Self::Timeout { .. } => "Timeout",
            Self::ToolFailed { .. } => "ToolFailed",
            Self::Upstream(_) => "Upstream",
            Self::Other(_) => "Other",
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl From<CircuitBreakerError<OperationError>> for OperationError {
    fn from(error: CircuitBreakerError<OperationError>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { key, .. } => Self::CircuitOpen { key },
            CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}

/// Errors raised while delivering error reports
#[derive(Error, Debug)]
pub enum ReportingError {
    #[error("Report delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Report sink rejected batch with status {status}")]
    Rejected { status: u16 },

    #[error("Report sink misconfigured: {reason}")]
    Configuration { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::categorize_message;

    #[test]
    fn test_messages_categorize_sensibly() {
        let timeout = OperationError::Timeout {
            operation: "decide".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(timeout.to_string(), "Operation decide timed out after 250ms");
        assert_eq!(
            categorize_message(&timeout.to_string()),
            crate::recovery::ErrorCategory::NetworkError
        );

        let open = OperationError::CircuitOpen {
            key: "decision_engine:decide".to_string(),
        };
        assert_eq!(
            categorize_message(&open.to_string()),
            crate::recovery::ErrorCategory::ServiceError
        );
    }

    #[test]
    fn test_unwraps_circuit_breaker_errors() {
        let failed: OperationError =
            CircuitBreakerError::OperationFailed(OperationError::upstream("boom")).into();
        assert_eq!(failed.to_string(), "boom");

        let open: OperationError = CircuitBreakerError::<OperationError>::CircuitOpen {
            key: "k".to_string(),
            retry_in: None,
        }
        .into();
        assert!(open.is_circuit_open());
        assert_eq!(open.kind(), "CircuitOpen");
    }
}
