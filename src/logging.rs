//! # Structured Logging Module
//!
//! Environment-aware structured logging for the conversation pipeline.
//! Console output is human-readable by default and switches to JSON lines
//! when `CHATBOT_LOG_FORMAT=json`. `RUST_LOG` overrides the derived level.

use crate::config::ConfigManager;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; a subscriber installed by the host
/// application is left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_output();

        let console = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn use_json_output() -> bool {
    std::env::var("CHATBOT_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

/// Log structured data for conversation state operations
pub fn log_conversation_operation(
    operation: &str,
    conversation_id: &str,
    state: &str,
    phase: Option<&str>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        conversation_id = %conversation_id,
        state = %state,
        phase = phase,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "💬 CONVERSATION_OPERATION"
    );
}

/// Log structured data for retry and recovery outcomes
pub fn log_recovery_operation(
    operation: &str,
    category: Option<&str>,
    attempt: u32,
    status: &str,
    delay_ms: Option<u64>,
) {
    tracing::info!(
        operation = %operation,
        category = category,
        attempt = attempt,
        status = %status,
        delay_ms = delay_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "🔁 RECOVERY_OPERATION"
    );
}

/// Log structured data for snapshot persistence
pub fn log_persistence_operation(
    operation: &str,
    backend: &str,
    conversation_id: Option<&str>,
    status: &str,
    duration_ms: Option<u64>,
) {
    tracing::debug!(
        operation = %operation,
        backend = %backend,
        conversation_id = conversation_id,
        status = %status,
        duration_ms = duration_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "💾 PERSISTENCE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
