//! # Decision Orchestrator
//!
//! Per-request driver. For each inbound message it:
//!
//! 1. loads the conversation (restoring a persisted snapshot if one exists),
//! 2. moves it to PROCESSING/ANALYSIS,
//! 3. asks the decision engine what to do, under the recovery service,
//! 4. runs requested tools concurrently and generates the final text,
//! 5. delivers the text and completes the request.
//!
//! Every state or phase change is followed by a best-effort snapshot save.
//! A failure that escapes recovery moves the conversation to ERROR and is
//! passed to the error handler, whose user-facing message is returned in the
//! error.

use super::collaborators::{ChatPlatform, DecisionEngine, ResponseGenerator, ToolExecutor};
use super::errors::OrchestratorError;
use super::metrics::OrchestratorMetrics;
use super::types::{Decision, DecisionInput, DecisionOutcome, OrchestratorStatus, ToolCall, ToolExecutionResult};
use crate::config::{ChatbotConfig, ConfigurationError};
use crate::constants::{components, dependency_key, operations};
use crate::error::Result as ChatbotResult;
use crate::events::{NoopEventSink, SharedEventSink};
use crate::logging::{log_conversation_operation, log_error, log_persistence_operation};
use crate::recovery::{
    ErrorContext, ErrorHandler, ErrorRecoveryService, ErrorReporter, OperationError, RetryOptions,
};
use crate::resilience::CircuitBreakerManager;
use crate::state_machine::{
    connect_persistence, ConversationId, ProcessingPhase, ProcessingState, ProcessingStateMachine,
    SharedStatePersistence, StateEvent, StateMachineError,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct DecisionOrchestrator {
    state_machine: Arc<ProcessingStateMachine>,
    persistence: SharedStatePersistence,
    recovery: Arc<ErrorRecoveryService>,
    error_handler: Arc<ErrorHandler>,
    decision_engine: Arc<dyn DecisionEngine>,
    tool_executor: Arc<dyn ToolExecutor>,
    response_generator: Arc<dyn ResponseGenerator>,
    chat_platform: Option<Arc<dyn ChatPlatform>>,
    config: ChatbotConfig,
    metrics: Arc<OrchestratorMetrics>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for DecisionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionOrchestrator")
            .field("state_machine", &self.state_machine)
            .field("persistence", &self.persistence.backend_name())
            .field("has_chat_platform", &self.chat_platform.is_some())
            .finish()
    }
}

impl DecisionOrchestrator {
    pub fn builder() -> DecisionOrchestratorBuilder {
        DecisionOrchestratorBuilder::new()
    }

    pub fn state_machine(&self) -> &Arc<ProcessingStateMachine> {
        &self.state_machine
    }

    pub fn persistence(&self) -> &SharedStatePersistence {
        &self.persistence
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryService> {
        &self.recovery
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    pub fn metrics(&self) -> &Arc<OrchestratorMetrics> {
        &self.metrics
    }

    /// Process one inbound message end to end
    pub async fn process(
        &self,
        input: DecisionInput,
    ) -> Result<DecisionOutcome, OrchestratorError> {
        let started = Instant::now();
        let conversation_id = input.conversation_id.clone();
        self.ensure_loaded(&conversation_id).await;

        self.state_machine.start_processing(
            &conversation_id,
            ProcessingPhase::Analysis,
            Some(json!({ "message_length": input.raw_message.chars().count() })),
        )?;
        self.metrics.record_started();
        self.state_machine
            .set_state_data(&conversation_id, "analysis", input.analysis.clone());
        self.persist(&conversation_id).await;

        self.advance_phase(&conversation_id, ProcessingPhase::Decision).await?;
        let decision = match self.decide(&input).await {
            Ok(decision) => decision,
            Err(error) => {
                return Err(self
                    .fail(
                        &conversation_id,
                        components::DECISION_ENGINE,
                        operations::DECIDE,
                        error,
                    )
                    .await)
            }
        };
        self.state_machine
            .set_state_data(&conversation_id, "decision", json!(decision.kind()));

        let mut tool_results = Vec::new();
        let response = match &decision {
            Decision::Respond { message } => {
                self.advance_phase(&conversation_id, ProcessingPhase::Generation).await?;
                message.clone()
            }
            Decision::Clarify { question } => {
                self.advance_phase(&conversation_id, ProcessingPhase::Generation).await?;
                question.clone()
            }
            Decision::UseTools { calls, .. } => {
                self.advance_phase(&conversation_id, ProcessingPhase::ToolExecution).await?;
                tool_results = self.execute_tools(&conversation_id, calls).await;

                self.advance_phase(&conversation_id, ProcessingPhase::Generation).await?;
                match self.generate(&input, &decision, &tool_results).await {
                    Ok(text) => text,
                    Err(error) => {
                        return Err(self
                            .fail(
                                &conversation_id,
                                components::RESPONSE_GENERATOR,
                                operations::GENERATE_RESPONSE,
                                error,
                            )
                            .await)
                    }
                }
            }
        };

        if let Err(error) = self.deliver(&conversation_id, &response).await {
            return Err(self
                .fail(
                    &conversation_id,
                    components::CHAT_PLATFORM,
                    operations::SEND_MESSAGE,
                    error,
                )
                .await);
        }

        let final_state = match self.state_machine.complete_processing(
            &conversation_id,
            Some(json!({
                "decision": decision.kind(),
                "duration_ms": started.elapsed().as_millis() as u64,
            })),
        ) {
            Ok(state) => state,
            Err(error) => return Err(self.abandon(&conversation_id, error).await),
        };
        self.persist(&conversation_id).await;

        self.metrics.record_succeeded(
            decision.uses_tools(),
            matches!(decision, Decision::Clarify { .. }),
        );
        log_conversation_operation(
            "process",
            conversation_id.as_str(),
            &final_state.to_string(),
            None,
            Some(decision.kind()),
        );

        Ok(DecisionOutcome {
            conversation_id,
            decision,
            response,
            tool_results,
            final_state,
        })
    }

    /// Return the conversation to READY and persist it
    pub async fn reset_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ProcessingState, OrchestratorError> {
        let state = self.state_machine.reset(conversation_id)?;
        self.persist(conversation_id).await;
        info!(conversation_id = %conversation_id, "🔄 Conversation reset");
        Ok(state)
    }

    /// Health output, including which persistence backend is active
    pub fn status(&self) -> OrchestratorStatus {
        let conversations_by_state: BTreeMap<String, usize> = ProcessingState::ALL
            .iter()
            .map(|state| (state.to_string(), self.state_machine.count_in_state(*state)))
            .collect();

        let mut open_circuits = self.recovery.breakers().system_metrics().open_circuits();
        open_circuits.extend(self.error_handler.breakers().system_metrics().open_circuits());
        open_circuits.sort();
        open_circuits.dedup();

        OrchestratorStatus {
            healthy: open_circuits.is_empty(),
            persistence_backend: self.persistence.backend_name().to_string(),
            active_conversations: self.state_machine.conversation_count(),
            conversations_by_state,
            open_circuits,
            queued_reports: self
                .error_handler
                .reporter()
                .map(|reporter| reporter.queue_len())
                .unwrap_or(0),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Start periodic idle-conversation cleanup, snapshot expiry and report
    /// flushing. Handles are aborted by [`Self::shutdown`].
    pub fn start_background_tasks(self: &Arc<Self>) {
        let mut handles = vec![self.spawn_maintenance(self.config.state_machine.cleanup_interval())];
        if let Some(reporter) = self.error_handler.reporter() {
            handles.push(reporter.spawn_flush_loop());
        }
        self.background.lock().extend(handles);
    }

    /// Spawn the maintenance loop on its own; the caller owns the handle
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                orchestrator.run_maintenance().await;
            }
        })
    }

    /// One maintenance pass; returns (conversations removed, snapshots removed)
    pub async fn run_maintenance(&self) -> (usize, usize) {
        let removed = self
            .state_machine
            .cleanup(self.config.state_machine.max_conversation_age());

        let expired = match self.persistence.cleanup(self.config.persistence.ttl()).await {
            Ok(count) => count,
            Err(error) => {
                warn!(error = %error, "Snapshot cleanup failed");
                0
            }
        };

        let patterns_pruned = self.error_handler.prune_patterns();

        debug!(
            conversations_removed = removed,
            snapshots_removed = expired,
            patterns_pruned = patterns_pruned,
            "Maintenance pass complete"
        );
        (removed, expired)
    }

    /// Stop background work, flush queued reports and drop all in-memory state.
    /// In-flight requests are not cancelled.
    pub async fn shutdown(&self) -> usize {
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }

        if let Some(reporter) = self.error_handler.reporter() {
            let flushed = reporter.flush_all().await;
            debug!(flushed = flushed, "Flushed error reports on shutdown");
        }

        let removed = self.state_machine.cleanup(Duration::ZERO);
        info!(conversations_removed = removed, "🛑 Decision orchestrator shut down");
        removed
    }

    async fn ensure_loaded(&self, conversation_id: &ConversationId) {
        if self.state_machine.has_state(conversation_id) {
            return;
        }

        let snapshot = match self.persistence.load(conversation_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "Failed to load state snapshot; starting fresh"
                );
                None
            }
        };

        match snapshot {
            Some(context) => {
                let interrupted = context.current_state == ProcessingState::Processing;
                self.state_machine.restore_state(conversation_id, context);
                if interrupted {
                    self.state_machine.set_state(
                        conversation_id,
                        ProcessingState::Ready,
                        Some(json!({ "reason": "interrupted_request_restored" })),
                    );
                    self.persist(conversation_id).await;
                }
                self.metrics.record_restored(interrupted);
            }
            None => self.state_machine.initialize(conversation_id),
        }
    }

    async fn advance_phase(
        &self,
        conversation_id: &ConversationId,
        phase: ProcessingPhase,
    ) -> Result<(), OrchestratorError> {
        if let Err(error) = self
            .state_machine
            .transition_to_phase(conversation_id, phase, None)
        {
            return Err(self.abandon(conversation_id, error).await);
        }
        self.persist(conversation_id).await;
        Ok(())
    }

    /// Park a request that broke the state machine contract mid-pipeline in
    /// ERROR, so the next message can start over without a manual reset
    async fn abandon(
        &self,
        conversation_id: &ConversationId,
        error: StateMachineError,
    ) -> OrchestratorError {
        warn!(
            conversation_id = %conversation_id,
            error = %error,
            "💥 Request broke the processing contract"
        );
        let metadata = Some(json!({ "error": error.to_string() }));
        if self
            .state_machine
            .transition(conversation_id, StateEvent::ErrorOccurred, metadata.clone())
            .is_err()
        {
            self.state_machine
                .set_state(conversation_id, ProcessingState::Error, metadata);
        }
        self.persist(conversation_id).await;
        self.metrics.record_failed();
        OrchestratorError::StateMachine(error)
    }

    async fn decide(&self, input: &DecisionInput) -> Result<Decision, OperationError> {
        let engine = &self.decision_engine;
        let timeout = self.operation_timeout();
        self.guarded(components::DECISION_ENGINE, operations::DECIDE, move || {
            with_timeout(operations::DECIDE, timeout, engine.decide(input))
        })
        .await
    }

    async fn execute_tools(
        &self,
        conversation_id: &ConversationId,
        calls: &[ToolCall],
    ) -> Vec<ToolExecutionResult> {
        let runs = calls
            .iter()
            .map(|call| self.execute_tool(conversation_id, call));
        futures::future::join_all(runs).await
    }

    async fn execute_tool(
        &self,
        conversation_id: &ConversationId,
        call: &ToolCall,
    ) -> ToolExecutionResult {
        let executor = &self.tool_executor;
        let timeout = self.operation_timeout();
        let result = self
            .guarded(components::TOOL_EXECUTOR, &call.name, move || {
                with_timeout(operations::EXECUTE_TOOL, timeout, executor.execute(call))
            })
            .await;

        match result {
            Ok(output) => {
                self.metrics.record_tool_invocation(true);
                ToolExecutionResult::succeeded(call, output)
            }
            Err(error) => {
                self.metrics.record_tool_invocation(false);
                let handled = self.error_handler.handle_error(
                    &error,
                    &ErrorContext::new(components::TOOL_EXECUTOR, call.name.clone())
                        .with_conversation(conversation_id.clone())
                        .with_metadata(json!({ "call_id": call.id })),
                );
                ToolExecutionResult::failed(call, error.to_string(), handled.category)
            }
        }
    }

    async fn generate(
        &self,
        input: &DecisionInput,
        decision: &Decision,
        tool_results: &[ToolExecutionResult],
    ) -> Result<String, OperationError> {
        let generator = &self.response_generator;
        let timeout = self.operation_timeout();
        self.guarded(
            components::RESPONSE_GENERATOR,
            operations::GENERATE_RESPONSE,
            move || {
                with_timeout(
                    operations::GENERATE_RESPONSE,
                    timeout,
                    generator.generate(input, decision, tool_results),
                )
            },
        )
        .await
    }

    async fn deliver(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), OperationError> {
        let Some(platform) = &self.chat_platform else {
            return Ok(());
        };
        let timeout = self.operation_timeout();
        self.guarded(
            components::CHAT_PLATFORM,
            operations::SEND_MESSAGE,
            move || {
                with_timeout(
                    operations::SEND_MESSAGE,
                    timeout,
                    platform.send_message(conversation_id, text),
                )
            },
        )
        .await
    }

    /// Fail fast if the handler has tripped this dependency, otherwise run
    /// `operation` under the recovery service
    async fn guarded<T, F, Fut>(
        &self,
        component: &str,
        operation: &str,
        run: F,
    ) -> Result<T, OperationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let key = dependency_key(component, operation);
        if self.error_handler.is_circuit_open(component, operation) {
            return Err(OperationError::CircuitOpen { key });
        }

        let metrics = Arc::clone(&self.metrics);
        let result = self
            .recovery
            .execute_with_retry(
                run,
                RetryOptions::new(operation)
                    .with_circuit_key(key)
                    .on_retry(move |_, _, _| metrics.record_retry()),
            )
            .await;

        if result.is_ok() {
            self.error_handler.record_success(component, operation);
        }
        result
    }

    async fn fail(
        &self,
        conversation_id: &ConversationId,
        component: &str,
        operation: &str,
        error: OperationError,
    ) -> OrchestratorError {
        let category = self.recovery.categorize(&error);

        if let Err(transition_error) = self.state_machine.transition(
            conversation_id,
            StateEvent::ErrorOccurred,
            Some(json!({
                "component": component,
                "operation": operation,
                "category": category,
                "error": error.to_string(),
            })),
        ) {
            warn!(
                conversation_id = %conversation_id,
                error = %transition_error,
                "Could not move conversation to error state"
            );
        }
        self.persist(conversation_id).await;

        let handled = self.error_handler.handle_error(
            &error,
            &ErrorContext::new(component, operation).with_conversation(conversation_id.clone()),
        );
        self.metrics.record_failed();
        log_error(
            component,
            operation,
            &error.to_string(),
            Some(conversation_id.as_str()),
        );

        if component != components::CHAT_PLATFORM {
            self.notify_user(conversation_id, &handled.user_message).await;
        }

        OrchestratorError::DecisionFailed {
            conversation_id: conversation_id.clone(),
            category: handled.category,
            user_message: handled.user_message,
            source: error,
        }
    }

    /// Best-effort apology; not retried
    async fn notify_user(&self, conversation_id: &ConversationId, text: &str) {
        if let Some(platform) = &self.chat_platform {
            if let Err(error) = platform.send_message(conversation_id, text).await {
                debug!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "Could not deliver failure message"
                );
            }
        }
    }

    async fn persist(&self, conversation_id: &ConversationId) {
        if !self.config.orchestrator.persist_transitions {
            return;
        }
        let Some(snapshot) = self.state_machine.snapshot(conversation_id) else {
            return;
        };

        let started = Instant::now();
        let backend = self.persistence.backend_name();
        match self.persistence.save(conversation_id, &snapshot).await {
            Ok(()) => log_persistence_operation(
                "save",
                backend,
                Some(conversation_id.as_str()),
                "ok",
                Some(started.elapsed().as_millis() as u64),
            ),
            Err(error) => {
                self.metrics.record_persistence_failure();
                warn!(
                    conversation_id = %conversation_id,
                    backend = backend,
                    error = %error,
                    "Failed to persist state snapshot; in-memory state kept"
                );
            }
        }
    }

    fn operation_timeout(&self) -> Duration {
        self.config.orchestrator.operation_timeout()
    }
}

async fn with_timeout<T>(
    operation: &str,
    timeout: Duration,
    future: impl Future<Output = Result<T, OperationError>>,
) -> Result<T, OperationError> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(OperationError::Timeout {
            operation: operation.to_string(),
            timeout,
        }),
    }
}

/// Assembles a [`DecisionOrchestrator`] from already-constructed parts.
///
/// Collaborators are required. Core components default to instances built
/// from the configuration; persistence defaults to the backend selected by
/// `persistence.backend`.
pub struct DecisionOrchestratorBuilder {
    config: ChatbotConfig,
    environment: String,
    events: SharedEventSink,
    state_machine: Option<Arc<ProcessingStateMachine>>,
    persistence: Option<SharedStatePersistence>,
    recovery: Option<Arc<ErrorRecoveryService>>,
    error_handler: Option<Arc<ErrorHandler>>,
    decision_engine: Option<Arc<dyn DecisionEngine>>,
    tool_executor: Option<Arc<dyn ToolExecutor>>,
    response_generator: Option<Arc<dyn ResponseGenerator>>,
    chat_platform: Option<Arc<dyn ChatPlatform>>,
}

impl Default for DecisionOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: ChatbotConfig::default(),
            environment: "development".to_string(),
            events: Arc::new(NoopEventSink),
            state_machine: None,
            persistence: None,
            recovery: None,
            error_handler: None,
            decision_engine: None,
            tool_executor: None,
            response_generator: None,
            chat_platform: None,
        }
    }

    pub fn config(mut self, config: ChatbotConfig) -> Self {
        self.config = config;
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Sink handed to every component the builder constructs itself
    pub fn events(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    pub fn state_machine(mut self, state_machine: Arc<ProcessingStateMachine>) -> Self {
        self.state_machine = Some(state_machine);
        self
    }

    pub fn persistence(mut self, persistence: SharedStatePersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn recovery(mut self, recovery: Arc<ErrorRecoveryService>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn error_handler(mut self, error_handler: Arc<ErrorHandler>) -> Self {
        self.error_handler = Some(error_handler);
        self
    }

    pub fn decision_engine(mut self, engine: Arc<dyn DecisionEngine>) -> Self {
        self.decision_engine = Some(engine);
        self
    }

    pub fn tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.tool_executor = Some(executor);
        self
    }

    pub fn response_generator(mut self, generator: Arc<dyn ResponseGenerator>) -> Self {
        self.response_generator = Some(generator);
        self
    }

    pub fn chat_platform(mut self, platform: Arc<dyn ChatPlatform>) -> Self {
        self.chat_platform = Some(platform);
        self
    }

    pub async fn build(self) -> ChatbotResult<DecisionOrchestrator> {
        let decision_engine = self.decision_engine.ok_or_else(|| {
            ConfigurationError::missing_required_field("decision_engine", "DecisionOrchestratorBuilder")
        })?;
        let tool_executor = self.tool_executor.ok_or_else(|| {
            ConfigurationError::missing_required_field("tool_executor", "DecisionOrchestratorBuilder")
        })?;
        let response_generator = self.response_generator.ok_or_else(|| {
            ConfigurationError::missing_required_field(
                "response_generator",
                "DecisionOrchestratorBuilder",
            )
        })?;

        self.config.validate()?;
        let events = self.events;

        let persistence = match self.persistence {
            Some(persistence) => persistence,
            None => connect_persistence(&self.config.persistence).await?,
        };

        let state_machine = self
            .state_machine
            .unwrap_or_else(|| Arc::new(ProcessingStateMachine::new(Arc::clone(&events))));

        let recovery = self.recovery.unwrap_or_else(|| {
            Arc::new(ErrorRecoveryService::new(
                self.config.recovery.resolver(),
                Arc::new(CircuitBreakerManager::new(
                    self.config.circuit_breaker.clone(),
                    Arc::clone(&events),
                )),
                Arc::clone(&events),
            ))
        });

        let error_handler = match self.error_handler {
            Some(handler) => handler,
            None => {
                let reporter = ErrorReporter::from_settings(
                    &self.config.reporting,
                    &self.environment,
                    Arc::clone(&events),
                )?;
                Arc::new(ErrorHandler::new(
                    self.config.error_handler.clone(),
                    CircuitBreakerManager::new(
                        self.config.circuit_breaker.clone(),
                        Arc::clone(&events),
                    ),
                    Some(Arc::new(reporter)),
                    Arc::clone(&events),
                ))
            }
        };

        info!(
            persistence_backend = persistence.backend_name(),
            environment = %self.environment,
            chat_platform = self.chat_platform.is_some(),
            "🚀 Decision orchestrator ready"
        );

        Ok(DecisionOrchestrator {
            state_machine,
            persistence,
            recovery,
            error_handler,
            decision_engine,
            tool_executor,
            response_generator,
            chat_platform: self.chat_platform,
            config: self.config,
            metrics: Arc::new(OrchestratorMetrics::new()),
            background: Mutex::new(Vec::new()),
        })
    }
}
