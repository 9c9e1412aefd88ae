//! # Failure Recovery
//!
//! Error categorization, retry policy resolution, the retrying recovery
//! service, and the error handler that turns escaped failures into
//! user-facing messages and queued error reports.
//!
//! ```rust,no_run
//! use chatbot_core::recovery::{ErrorRecoveryService, OperationError, RetryOptions};
//!
//! # async fn example() -> Result<(), OperationError> {
//! let service = ErrorRecoveryService::default();
//! let answer = service
//!     .execute_with_retry(
//!         || async { Ok::<_, OperationError>("hello") },
//!         RetryOptions::new("decide"),
//!     )
//!     .await?;
//! assert_eq!(answer, "hello");
//! # Ok(())
//! # }
//! ```

pub mod categorizer;
pub mod errors;
pub mod handler;
pub mod reporting;
pub mod retry_policy;
pub mod service;

pub use categorizer::{categorize_message, ErrorCategorizer, ErrorCategory};
pub use errors::{OperationError, ReportingError};
pub use handler::{ErrorContext, ErrorHandler, HandledError};
pub use reporting::{
    EnvironmentSnapshot, ErrorReport, ErrorReportSink, ErrorReporter, ErrorSummary,
    HttpErrorReportSink, LogErrorReportSink, ReportContext,
};
pub use retry_policy::{RetryPolicy, RetryPolicyResolver, RetryStrategy};
pub use service::{ErrorRecoveryService, RetryOptions};
