//! # Error Reporting
//!
//! Handled errors are turned into immutable [`ErrorReport`]s and queued in a
//! bounded buffer (oldest dropped first). A flush drains at most one batch per
//! call, which rate-limits delivery to the external sink. Delivery is
//! best-effort: a failed batch is logged and dropped.

use super::{ErrorCategory, OperationError, ReportingError};
use crate::config::ReportingSettings;
use crate::events::{LifecycleEvent, NoopEventSink, SharedEventSink};
use crate::state_machine::ConversationId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub name: String,
    pub message: String,
    pub category: ErrorCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportContext {
    pub operation: String,
    pub component: String,
    pub conversation_id: Option<ConversationId>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSnapshot {
    pub service_name: String,
    pub environment: String,
    pub version: String,
    pub process_id: u32,
}

impl EnvironmentSnapshot {
    pub fn capture(service_name: &str, environment: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            environment: environment.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            process_id: std::process::id(),
        }
    }
}

/// One handled error, as delivered to the report sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error: ErrorSummary,
    pub context: ReportContext,
    pub environment: EnvironmentSnapshot,
}

impl ErrorReport {
    pub fn new(
        error: &OperationError,
        category: ErrorCategory,
        context: ReportContext,
        environment: EnvironmentSnapshot,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            error: ErrorSummary {
                name: error.kind().to_string(),
                message: error.to_string(),
                category,
            },
            context,
            environment,
        }
    }
}

/// Destination for batches of error reports
#[async_trait]
pub trait ErrorReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, batch: &[ErrorReport]) -> Result<(), ReportingError>;
}

/// Sink that writes reports to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorReportSink;

#[async_trait]
impl ErrorReportSink for LogErrorReportSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, batch: &[ErrorReport]) -> Result<(), ReportingError> {
        for report in batch {
            warn!(
                report_id = %report.id,
                component = %report.context.component,
                operation = %report.context.operation,
                category = %report.error.category,
                message = %report.error.message,
                "📋 Error report"
            );
        }
        Ok(())
    }
}

/// Sink that POSTs batches as JSON to an HTTP endpoint
pub struct HttpErrorReportSink {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<SecretString>,
}

impl std::fmt::Debug for HttpErrorReportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpErrorReportSink")
            .field("endpoint", &self.endpoint)
            .field("has_token", &self.api_token.is_some())
            .finish()
    }
}

#[derive(Serialize)]
struct ReportBatch<'a> {
    reports: &'a [ErrorReport],
}

impl HttpErrorReportSink {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ReportingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_token,
        })
    }
}

#[async_trait]
impl ErrorReportSink for HttpErrorReportSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, batch: &[ErrorReport]) -> Result<(), ReportingError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&ReportBatch { reports: batch });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReportingError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Bounded queue of error reports with batched delivery
pub struct ErrorReporter {
    queue: Mutex<VecDeque<ErrorReport>>,
    sink: Arc<dyn ErrorReportSink>,
    events: SharedEventSink,
    environment: EnvironmentSnapshot,
    enabled: bool,
    max_queue_size: usize,
    batch_size: usize,
    flush_interval: Duration,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("sink", &self.sink.name())
            .field("enabled", &self.enabled)
            .field("queued", &self.queue_len())
            .field("max_queue_size", &self.max_queue_size)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl ErrorReporter {
    pub fn new(
        settings: &ReportingSettings,
        environment: &str,
        sink: Arc<dyn ErrorReportSink>,
        events: SharedEventSink,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(settings.max_queue_size)),
            sink,
            events,
            environment: EnvironmentSnapshot::capture(&settings.service_name, environment),
            enabled: settings.enabled,
            max_queue_size: settings.max_queue_size.max(1),
            batch_size: settings.batch_size.max(1),
            flush_interval: Duration::from_secs(settings.flush_interval_secs.max(1)),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Build a reporter whose sink is chosen from settings: HTTP when an
    /// endpoint is configured, the log otherwise.
    pub fn from_settings(
        settings: &ReportingSettings,
        environment: &str,
        events: SharedEventSink,
    ) -> Result<Self, ReportingError> {
        let sink: Arc<dyn ErrorReportSink> = match &settings.endpoint {
            Some(endpoint) if settings.enabled => Arc::new(HttpErrorReportSink::new(
                endpoint.clone(),
                settings.api_token.clone(),
                Duration::from_secs(10),
            )?),
            _ => Arc::new(LogErrorReportSink),
        };
        info!(sink = sink.name(), enabled = settings.enabled, "Error reporter configured");
        Ok(Self::new(settings, environment, sink, events))
    }

    pub fn environment(&self) -> &EnvironmentSnapshot {
        &self.environment
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Queue a report; returns false when reporting is disabled
    pub fn enqueue(&self, report: ErrorReport) -> bool {
        if !self.enabled {
            return false;
        }

        let evicted = {
            let mut queue = self.queue.lock();
            let mut evicted = 0usize;
            while queue.len() >= self.max_queue_size {
                queue.pop_front();
                evicted += 1;
            }
            queue.push_back(report);
            evicted
        };

        if evicted > 0 {
            self.dropped.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted = evicted, "Error report queue full; dropped oldest");
            self.events.emit(LifecycleEvent::ReportsDropped {
                count: evicted,
                reason: "queue_full".to_string(),
            });
        }
        true
    }

    /// Deliver at most one batch; returns how many reports were delivered
    pub async fn flush(&self) -> Result<usize, ReportingError> {
        let batch: Vec<ErrorReport> = {
            let mut queue = self.queue.lock();
            let take = queue.len().min(self.batch_size);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        match self.sink.deliver(&batch).await {
            Ok(()) => {
                self.delivered.fetch_add(batch.len() as u64, Ordering::Relaxed);
                debug!(count = batch.len(), sink = self.sink.name(), "Flushed error reports");
                self.events.emit(LifecycleEvent::ReportsFlushed { count: batch.len() });
                Ok(batch.len())
            }
            Err(error) => {
                self.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                warn!(
                    count = batch.len(),
                    sink = self.sink.name(),
                    error = %error,
                    "Error report delivery failed; batch dropped"
                );
                self.events.emit(LifecycleEvent::ReportsDropped {
                    count: batch.len(),
                    reason: "delivery_failed".to_string(),
                });
                Err(error)
            }
        }
    }

    /// Flush batches until the queue is empty; failed batches are dropped
    pub async fn flush_all(&self) -> usize {
        let mut delivered = 0;
        while self.queue_len() > 0 {
            if let Ok(count) = self.flush().await {
                delivered += count;
            }
        }
        delivered
    }

    /// Flush one batch per configured interval until the handle is aborted
    pub fn spawn_flush_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reporter.flush_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // failures are already logged and counted
                let _ = reporter.flush().await;
            }
        })
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(
            &ReportingSettings::default(),
            "development",
            Arc::new(LogErrorReportSink),
            Arc::new(NoopEventSink),
        )
    }
}
