//! # Error Categorization
//!
//! Maps a raw failure onto a small fixed taxonomy by case-insensitive
//! keyword matching over the error message. Keyword groups are checked in a
//! fixed order (network, rate limit, invalid request, service) so a message
//! matching several groups always lands in the same category.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Failure categories driving retry policy and user-facing messaging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Connection refused, reset, DNS failures, timeouts
    #[serde(alias = "network_error")]
    NetworkError,
    /// Provider throttling or exhausted quota
    #[serde(alias = "rate_limit")]
    RateLimit,
    /// Permanent caller-side failure; never retried
    #[serde(alias = "invalid_request")]
    InvalidRequest,
    /// Upstream 5xx or open circuit
    #[serde(alias = "service_error")]
    ServiceError,
    #[serde(alias = "unknown")]
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 5] = [
        Self::NetworkError,
        Self::RateLimit,
        Self::InvalidRequest,
        Self::ServiceError,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::RateLimit => "RATE_LIMIT",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::ServiceError => "SERVICE_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether failures in this category may ever be retried
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidRequest)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("Unknown error category: {s}"))
    }
}

const NETWORK_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "econnrefused",
    "econnreset",
    "enotfound",
    "etimedout",
    "fetch failed",
    "connection refused",
    "connection reset",
    "socket hang up",
    "network",
];

const RATE_LIMIT_KEYWORDS: &[&str] = &["429", "rate limit", "too many requests", "quota"];

const INVALID_REQUEST_KEYWORDS: &[&str] = &[
    "400",
    "401",
    "403",
    "404",
    "invalid",
    "validation",
    "bad request",
    "unauthorized",
    "forbidden",
];

const SERVICE_KEYWORDS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "circuit",
    "upstream",
    "service unavailable",
    "internal server error",
    "bad gateway",
];

/// Stateless keyword categorizer
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorCategorizer;

impl ErrorCategorizer {
    pub fn new() -> Self {
        Self
    }

    /// Categorize any displayable error by its message
    pub fn categorize<E: fmt::Display + ?Sized>(&self, error: &E) -> ErrorCategory {
        categorize_message(&error.to_string())
    }
}

/// Categorize a raw error message
pub fn categorize_message(message: &str) -> ErrorCategory {
    let lowered = message.to_lowercase();
    let matches_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if matches_any(NETWORK_KEYWORDS) {
        ErrorCategory::NetworkError
    } else if matches_any(RATE_LIMIT_KEYWORDS) {
        ErrorCategory::RateLimit
    } else if matches_any(INVALID_REQUEST_KEYWORDS) {
        ErrorCategory::InvalidRequest
    } else if matches_any(SERVICE_KEYWORDS) {
        ErrorCategory::ServiceError
    } else {
        ErrorCategory::Unknown
    }
}
