use async_trait::async_trait;
use chatbot_core::config::ChatbotConfig;
use chatbot_core::events::RecordingEventSink;
use chatbot_core::orchestration::{
    ChatPlatform, Decision, DecisionEngine, DecisionInput, DecisionOrchestrator, ResponseGenerator,
    ToolCall, ToolExecutionResult, ToolExecutor,
};
use chatbot_core::recovery::OperationError;
use chatbot_core::state_machine::{
    ConversationId, InMemoryStatePersistence, PersistenceError, PersistenceResult,
    SharedStatePersistence, StateMachineContext, StatePersistence,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Decision engine that fails with queued messages before answering
#[derive(Debug)]
pub struct MockDecisionEngine {
    decision: Decision,
    failures: Mutex<VecDeque<String>>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockDecisionEngine {
    pub fn responding(message: &str) -> Self {
        Self::deciding(Decision::Respond {
            message: message.to_string(),
        })
    }

    pub fn deciding(decision: Decision) -> Self {
        Self {
            decision,
            failures: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing_first(self, messages: &[&str]) -> Self {
        self.failures
            .lock()
            .extend(messages.iter().map(|m| m.to_string()));
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionEngine for MockDecisionEngine {
    async fn decide(&self, _input: &DecisionInput) -> Result<Decision, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(message) => Err(OperationError::upstream(message)),
            None => Ok(self.decision.clone()),
        }
    }
}

/// Tool executor with fixed per-tool outcomes; unknown tools are rejected
#[derive(Debug, Default)]
pub struct MockToolExecutor {
    outcomes: HashMap<String, Result<Value, String>>,
    invoked: Mutex<Vec<String>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: &str, output: Value) -> Self {
        self.outcomes.insert(name.to_string(), Ok(output));
        self
    }

    pub fn with_failing_tool(mut self, name: &str, message: &str) -> Self {
        self.outcomes
            .insert(name.to_string(), Err(message.to_string()));
        self
    }

    pub fn invoked(&self) -> Vec<String> {
        self.invoked.lock().clone()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(&self, call: &ToolCall) -> Result<Value, OperationError> {
        self.invoked.lock().push(call.name.clone());
        match self.outcomes.get(&call.name) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(message)) => Err(OperationError::tool_failed(&call.name, message.clone())),
            None => Err(OperationError::tool_failed(
                &call.name,
                "invalid tool: not registered",
            )),
        }
    }
}

/// Summarizes tool results into a sentence
#[derive(Debug, Default)]
pub struct SummaryResponseGenerator;

#[async_trait]
impl ResponseGenerator for SummaryResponseGenerator {
    async fn generate(
        &self,
        _input: &DecisionInput,
        _decision: &Decision,
        tool_results: &[ToolExecutionResult],
    ) -> Result<String, OperationError> {
        let succeeded = tool_results.iter().filter(|r| r.success).count();
        Ok(format!(
            "Used {} tool(s), {} succeeded",
            tool_results.len(),
            succeeded
        ))
    }
}

/// Records delivered messages; optionally rejects every send
#[derive(Debug, Default)]
pub struct RecordingChatPlatform {
    sent: Mutex<Vec<(ConversationId, String)>>,
    reject_with: Option<String>,
}

impl RecordingChatPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject_with: Some(message.to_string()),
        }
    }

    pub fn sent(&self) -> Vec<(ConversationId, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatPlatform for RecordingChatPlatform {
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), OperationError> {
        if let Some(message) = &self.reject_with {
            return Err(OperationError::upstream(message.clone()));
        }
        self.sent.lock().push((conversation_id.clone(), text.to_string()));
        Ok(())
    }
}

/// Backend whose every operation fails
#[derive(Debug, Default)]
pub struct UnavailablePersistence;

fn unavailable() -> PersistenceError {
    PersistenceError::Backend {
        reason: "connection refused".to_string(),
    }
}

#[async_trait]
impl StatePersistence for UnavailablePersistence {
    fn backend_name(&self) -> &'static str {
        "unavailable"
    }

    async fn save(
        &self,
        _conversation_id: &ConversationId,
        _snapshot: &StateMachineContext,
    ) -> PersistenceResult<()> {
        Err(unavailable())
    }

    async fn load(
        &self,
        _conversation_id: &ConversationId,
    ) -> PersistenceResult<Option<StateMachineContext>> {
        Err(unavailable())
    }

    async fn delete(&self, _conversation_id: &ConversationId) -> PersistenceResult<bool> {
        Err(unavailable())
    }

    async fn exists(&self, _conversation_id: &ConversationId) -> PersistenceResult<bool> {
        Err(unavailable())
    }

    async fn cleanup(&self, _ttl: Duration) -> PersistenceResult<usize> {
        Err(unavailable())
    }
}

/// Everything a test needs to drive and inspect one orchestrator
pub struct Harness {
    pub orchestrator: Arc<DecisionOrchestrator>,
    pub engine: Arc<MockDecisionEngine>,
    pub tools: Arc<MockToolExecutor>,
    pub platform: Arc<RecordingChatPlatform>,
    pub persistence: SharedStatePersistence,
    pub events: RecordingEventSink,
}

pub struct HarnessBuilder {
    config: ChatbotConfig,
    engine: MockDecisionEngine,
    tools: MockToolExecutor,
    platform: RecordingChatPlatform,
    persistence: SharedStatePersistence,
}

impl HarnessBuilder {
    pub fn new(engine: MockDecisionEngine) -> Self {
        let mut config = ChatbotConfig::default();
        config.reporting.enabled = false;
        Self {
            config,
            engine,
            tools: MockToolExecutor::new(),
            platform: RecordingChatPlatform::new(),
            persistence: Arc::new(InMemoryStatePersistence::new()),
        }
    }

    pub fn config(mut self, update: impl FnOnce(&mut ChatbotConfig)) -> Self {
        update(&mut self.config);
        self
    }

    pub fn tools(mut self, tools: MockToolExecutor) -> Self {
        self.tools = tools;
        self
    }

    pub fn platform(mut self, platform: RecordingChatPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn persistence(mut self, persistence: SharedStatePersistence) -> Self {
        self.persistence = persistence;
        self
    }

    pub async fn build(self) -> Harness {
        let events = RecordingEventSink::new();
        let engine = Arc::new(self.engine);
        let tools = Arc::new(self.tools);
        let platform = Arc::new(self.platform);

        let orchestrator = DecisionOrchestrator::builder()
            .config(self.config)
            .environment("test")
            .events(Arc::new(events.clone()))
            .persistence(Arc::clone(&self.persistence))
            .decision_engine(engine.clone())
            .tool_executor(tools.clone())
            .response_generator(Arc::new(SummaryResponseGenerator))
            .chat_platform(platform.clone())
            .build()
            .await
            .expect("orchestrator should build");

        Harness {
            orchestrator: Arc::new(orchestrator),
            engine,
            tools,
            platform,
            persistence: self.persistence,
            events,
        }
    }
}
