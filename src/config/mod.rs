//! # Chatbot Core Configuration
//!
//! Typed configuration for every subsystem, loaded in layers by
//! [`ConfigManager`]: `config/default.toml`, then `config/{environment}.toml`,
//! then `CHATBOT__*` environment variables. Every layer is optional; any field
//! left unset keeps its default.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chatbot_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let timeout = manager.config().orchestrator.operation_timeout();
//! println!("{} uses a {:?} operation timeout", manager.environment(), timeout);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::{DEFAULT_STATE_TABLE, DEFAULT_STATE_TTL};
use crate::recovery::{ErrorCategory, RetryPolicy, RetryPolicyResolver};
use crate::resilience::CircuitBreakerConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatbotConfig {
    pub state_machine: StateMachineSettings,
    pub persistence: PersistenceConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub recovery: RecoverySettings,
    pub error_handler: ErrorHandlerSettings,
    pub reporting: ReportingSettings,
    pub orchestrator: OrchestratorSettings,
}

impl ChatbotConfig {
    /// Reject configurations that would misbehave at runtime
    pub fn validate(&self) -> ConfigResult<()> {
        self.circuit_breaker.validate()?;
        self.persistence.validate()?;
        self.reporting.validate()?;

        if self.error_handler.pattern_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "error_handler.pattern_threshold",
                "0",
                "must be greater than 0",
            ));
        }

        if self.error_handler.max_tracked_patterns == 0 {
            return Err(ConfigurationError::invalid_value(
                "error_handler.max_tracked_patterns",
                "0",
                "must be greater than 0",
            ));
        }

        if self.orchestrator.operation_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.operation_timeout_ms",
                "0",
                "must be greater than 0",
            ));
        }

        if self.state_machine.cleanup_interval_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "state_machine.cleanup_interval_secs",
                "0",
                "must be greater than 0",
            ));
        }

        for (operation, policy) in &self.recovery.operation_policies {
            if policy.initial_delay_ms > policy.max_delay_ms {
                return Err(ConfigurationError::invalid_value(
                    format!("recovery.operation_policies.{operation}.initial_delay_ms"),
                    policy.initial_delay_ms.to_string(),
                    "must not exceed max_delay_ms",
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineSettings {
    /// Idle conversations older than this are dropped by maintenance
    pub max_conversation_age_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl StateMachineSettings {
    pub fn max_conversation_age(&self) -> Duration {
        Duration::from_secs(self.max_conversation_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for StateMachineSettings {
    fn default() -> Self {
        Self {
            max_conversation_age_secs: 3600,
            cleanup_interval_secs: 300,
        }
    }
}

/// Which snapshot store to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceBackendKind {
    /// Postgres when a URL is configured and reachable, otherwise memory
    #[default]
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackendKind,
    pub database_url: Option<String>,
    pub ttl_secs: u64,
    pub table_name: String,
    pub max_connections: u32,
}

impl PersistenceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.backend == PersistenceBackendKind::Postgres && self.database_url.is_none() {
            return Err(ConfigurationError::missing_required_field(
                "database_url",
                "persistence (backend = postgres)",
            ));
        }
        if self.ttl_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "persistence.ttl_secs",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackendKind::Auto,
            database_url: None,
            ttl_secs: DEFAULT_STATE_TTL.as_secs(),
            table_name: DEFAULT_STATE_TABLE.to_string(),
            max_connections: 5,
        }
    }
}

/// Partial breaker configuration applied on top of the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerOverride {
    pub failure_threshold: Option<u32>,
    pub recovery_timeout_ms: Option<u64>,
    pub half_open_max_calls: Option<u32>,
}

/// Breaker defaults plus overrides keyed by `component:operation` or `component`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_max_calls: u32,
    pub component_overrides: HashMap<String, CircuitBreakerOverride>,
}

impl CircuitBreakerSettings {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout_ms: config.recovery_timeout.as_millis() as u64,
            half_open_max_calls: config.half_open_max_calls,
            component_overrides: HashMap::new(),
        }
    }

    pub fn default_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            half_open_max_calls: self.half_open_max_calls,
        }
    }

    /// Resolve the configuration for a breaker key.
    ///
    /// An override for the exact key wins; otherwise an override for the
    /// component part (before `:`) applies.
    pub fn config_for(&self, key: &str) -> CircuitBreakerConfig {
        let component = key.split(':').next().unwrap_or(key);
        let found = self
            .component_overrides
            .get(key)
            .or_else(|| self.component_overrides.get(component));

        let mut config = self.default_config();
        if let Some(overrides) = found {
            if let Some(threshold) = overrides.failure_threshold {
                config.failure_threshold = threshold;
            }
            if let Some(timeout_ms) = overrides.recovery_timeout_ms {
                config.recovery_timeout = Duration::from_millis(timeout_ms);
            }
            if let Some(max_calls) = overrides.half_open_max_calls {
                config.half_open_max_calls = max_calls;
            }
        }
        config
    }

    fn validate(&self) -> ConfigResult<()> {
        self.default_config().validate().map_err(|reason| {
            ConfigurationError::invalid_value(
                "circuit_breaker",
                format!("{:?}", self.default_config()),
                reason,
            )
        })?;

        for key in self.component_overrides.keys() {
            let config = self.config_for(key);
            config.validate().map_err(|reason| {
                ConfigurationError::invalid_value(
                    format!("circuit_breaker.component_overrides.{key}"),
                    format!("{config:?}"),
                    reason,
                )
            })?;
        }
        Ok(())
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self::from_config(&CircuitBreakerConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    /// Operation name → policy, applied before category defaults
    pub operation_policies: HashMap<String, RetryPolicy>,
}

impl RecoverySettings {
    pub fn resolver(&self) -> RetryPolicyResolver {
        RetryPolicyResolver::with_overrides(self.operation_policies.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlerSettings {
    pub category_messages: HashMap<ErrorCategory, String>,
    pub default_message: String,
    pub circuit_open_message: String,
    /// Occurrences of one failure signature that raise a pattern event
    pub pattern_threshold: u64,
    /// Characters of the error message included in the failure signature
    pub message_prefix_len: usize,
    /// Signatures unseen for this long are forgotten
    pub pattern_window_secs: u64,
    /// Most signatures tracked at once; the least recently seen is evicted
    pub max_tracked_patterns: usize,
}

impl ErrorHandlerSettings {
    pub fn pattern_window(&self) -> Duration {
        Duration::from_secs(self.pattern_window_secs)
    }
}

impl Default for ErrorHandlerSettings {
    fn default() -> Self {
        let category_messages = HashMap::from([
            (
                ErrorCategory::NetworkError,
                "I'm having trouble connecting right now. Please try again in a moment."
                    .to_string(),
            ),
            (
                ErrorCategory::RateLimit,
                "I'm getting a lot of requests right now. Please wait a moment and try again."
                    .to_string(),
            ),
            (
                ErrorCategory::InvalidRequest,
                "I couldn't process that request. Could you try rephrasing it?".to_string(),
            ),
            (
                ErrorCategory::ServiceError,
                "One of the services I rely on is having problems. Please try again shortly."
                    .to_string(),
            ),
        ]);

        Self {
            category_messages,
            default_message: "Something went wrong while handling your message. Please try again."
                .to_string(),
            circuit_open_message:
                "This feature is temporarily unavailable. Please try again in a few minutes."
                    .to_string(),
            pattern_threshold: 3,
            message_prefix_len: 50,
            pattern_window_secs: 3600,
            max_tracked_patterns: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingSettings {
    pub enabled: bool,
    /// HTTP endpoint receiving report batches; reports are logged when unset
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub api_token: Option<SecretString>,
    pub service_name: String,
    pub max_queue_size: usize,
    pub batch_size: usize,
    pub flush_interval_secs: u64,
}

impl ReportingSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_queue_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "reporting.max_queue_size",
                "0",
                "must be greater than 0",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "reporting.batch_size",
                "0",
                "must be greater than 0",
            ));
        }
        if self.batch_size > self.max_queue_size {
            return Err(ConfigurationError::invalid_value(
                "reporting.batch_size",
                self.batch_size.to_string(),
                format!("must not exceed max_queue_size ({})", self.max_queue_size),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "reporting.flush_interval_secs",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for ReportingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            api_token: None,
            service_name: "chatbot-core".to_string(),
            max_queue_size: 100,
            batch_size: 10,
            flush_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Per-attempt deadline around collaborator calls
    pub operation_timeout_ms: u64,
    pub persist_transitions: bool,
}

impl OrchestratorSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 30_000,
            persist_transitions: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ChatbotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.persistence.ttl(), Duration::from_secs(86_400));
        assert_eq!(config.persistence.table_name, "conversation_state_snapshots");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.error_handler.pattern_threshold, 3);
        assert_eq!(config.reporting.batch_size, 10);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ChatbotConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = ChatbotConfig::default();
        config.reporting.max_queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = ChatbotConfig::default();
        config.reporting.batch_size = 500;
        assert!(config.validate().is_err());

        let mut config = ChatbotConfig::default();
        config.error_handler.max_tracked_patterns = 0;
        assert!(config.validate().is_err());

        let mut config = ChatbotConfig::default();
        config.persistence.backend = PersistenceBackendKind::Postgres;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_breaker_override_resolution() {
        let mut settings = CircuitBreakerSettings::default();
        settings.component_overrides.insert(
            "tool_executor".to_string(),
            CircuitBreakerOverride {
                failure_threshold: Some(2),
                ..Default::default()
            },
        );
        settings.component_overrides.insert(
            "tool_executor:execute_tool".to_string(),
            CircuitBreakerOverride {
                recovery_timeout_ms: Some(5_000),
                ..Default::default()
            },
        );

        let exact = settings.config_for("tool_executor:execute_tool");
        assert_eq!(exact.failure_threshold, 5);
        assert_eq!(exact.recovery_timeout, Duration::from_secs(5));

        let component = settings.config_for("tool_executor:other");
        assert_eq!(component.failure_threshold, 2);

        let plain = settings.config_for("decision_engine:decide");
        assert_eq!(plain, CircuitBreakerConfig::default());
    }
}
