//! # Resilience Module
//!
//! Circuit breakers that stop calling a failing dependency for a cooldown
//! period, so one broken language-model endpoint or tool server cannot drag
//! every conversation down with it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use chatbot_core::resilience::{CircuitBreakerConfig, CircuitBreakerManager};
//!
//! # async fn example() {
//! let manager = CircuitBreakerManager::with_config(CircuitBreakerConfig::for_tool_server());
//!
//! let result = manager
//!     .call("tool_executor:web_search", || async { Ok::<_, String>("results") })
//!     .await;
//! assert!(result.is_ok());
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
