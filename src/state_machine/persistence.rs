//! # State Persistence
//!
//! Pluggable snapshot storage for conversation state, keyed by conversation
//! id. Backends hold serialized copies only; the live entry always belongs to
//! the [`ProcessingStateMachine`](super::ProcessingStateMachine).
//!
//! Backend selection follows a fixed fallback order (see
//! [`connect_persistence`]): an explicitly configured backend is used as-is,
//! while `auto` tries Postgres when a database URL is present and falls back
//! to the in-process store.

use super::context::{ConversationId, StateMachineContext};
use super::errors::{PersistenceError, PersistenceResult};
use super::pg_persistence::PgStatePersistence;
use crate::config::{PersistenceBackendKind, PersistenceConfig};
use crate::constants::STATE_SCHEMA_VERSION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Storage contract for conversation state snapshots
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// Short backend identifier surfaced in health output
    fn backend_name(&self) -> &'static str;

    /// Store (or overwrite) the snapshot for a conversation
    async fn save(
        &self,
        conversation_id: &ConversationId,
        snapshot: &StateMachineContext,
    ) -> PersistenceResult<()>;

    /// Load the snapshot for a conversation, if one exists and has not expired
    async fn load(
        &self,
        conversation_id: &ConversationId,
    ) -> PersistenceResult<Option<StateMachineContext>>;

    /// Delete a snapshot; returns whether one existed
    async fn delete(&self, conversation_id: &ConversationId) -> PersistenceResult<bool>;

    async fn exists(&self, conversation_id: &ConversationId) -> PersistenceResult<bool>;

    /// Remove snapshots older than `ttl`; returns the number removed
    async fn cleanup(&self, ttl: Duration) -> PersistenceResult<usize>;
}

/// Shared handle to a persistence backend
pub type SharedStatePersistence = Arc<dyn StatePersistence>;

/// On-disk / key-value shape of a persisted snapshot.
///
/// Serialized as camelCase JSON with a `schemaVersion` field. Loaders reject
/// any version other than [`STATE_SCHEMA_VERSION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedStateRecord {
    pub schema_version: u32,
    #[serde(flatten)]
    pub context: StateMachineContext,
}

impl PersistedStateRecord {
    pub fn new(context: StateMachineContext) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            context,
        }
    }

    /// Encode a snapshot as a JSON value
    pub fn encode(context: &StateMachineContext) -> PersistenceResult<Value> {
        Ok(serde_json::to_value(Self::new(context.clone()))?)
    }

    /// Decode a JSON value, checking the schema version before the body
    pub fn decode(value: Value) -> PersistenceResult<StateMachineContext> {
        let version = value
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| PersistenceError::MalformedRecord {
                reason: "missing schemaVersion".to_string(),
            })?;

        if version != u64::from(STATE_SCHEMA_VERSION) {
            return Err(PersistenceError::UnsupportedSchemaVersion {
                found: u32::try_from(version).unwrap_or(u32::MAX),
                expected: STATE_SCHEMA_VERSION,
            });
        }

        let record: Self = serde_json::from_value(value)?;
        Ok(record.context)
    }

    pub fn encode_string(context: &StateMachineContext) -> PersistenceResult<String> {
        Ok(serde_json::to_string(&Self::encode(context)?)?)
    }

    pub fn decode_str(payload: &str) -> PersistenceResult<StateMachineContext> {
        Self::decode(serde_json::from_str(payload)?)
    }
}

#[derive(Debug, Clone)]
struct StoredSnapshot {
    payload: String,
    saved_at: DateTime<Utc>,
}

/// In-process snapshot store; records only expire through [`StatePersistence::cleanup`]
#[derive(Debug, Default)]
pub struct InMemoryStatePersistence {
    records: DashMap<ConversationId, StoredSnapshot>,
}

impl InMemoryStatePersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StatePersistence for InMemoryStatePersistence {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn save(
        &self,
        conversation_id: &ConversationId,
        snapshot: &StateMachineContext,
    ) -> PersistenceResult<()> {
        let payload = PersistedStateRecord::encode_string(snapshot)?;
        self.records.insert(
            conversation_id.clone(),
            StoredSnapshot {
                payload,
                saved_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn load(
        &self,
        conversation_id: &ConversationId,
    ) -> PersistenceResult<Option<StateMachineContext>> {
        let payload = match self.records.get(conversation_id) {
            Some(stored) => stored.payload.clone(),
            None => return Ok(None),
        };
        PersistedStateRecord::decode_str(&payload).map(Some)
    }

    async fn delete(&self, conversation_id: &ConversationId) -> PersistenceResult<bool> {
        Ok(self.records.remove(conversation_id).is_some())
    }

    async fn exists(&self, conversation_id: &ConversationId) -> PersistenceResult<bool> {
        Ok(self.records.contains_key(conversation_id))
    }

    async fn cleanup(&self, ttl: Duration) -> PersistenceResult<usize> {
        let before = self.records.len();
        if ttl.is_zero() {
            self.records.clear();
        } else {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
            let cutoff = Utc::now() - ttl;
            self.records.retain(|_, stored| stored.saved_at > cutoff);
        }
        let removed = before.saturating_sub(self.records.len());
        debug!(removed = removed, backend = "memory", "Snapshot cleanup complete");
        Ok(removed)
    }
}

/// Build the persistence backend described by `config`.
///
/// `memory` and `postgres` are honored exactly (a failing Postgres
/// connection is an error). `auto` uses Postgres when a URL is configured and
/// reachable, otherwise the in-process store.
pub async fn connect_persistence(
    config: &PersistenceConfig,
) -> PersistenceResult<SharedStatePersistence> {
    match config.backend {
        PersistenceBackendKind::Memory => {
            info!(backend = "memory", "💾 State persistence selected");
            Ok(Arc::new(InMemoryStatePersistence::new()))
        }
        PersistenceBackendKind::Postgres => {
            let backend = connect_postgres(config).await?;
            info!(backend = "postgres", "💾 State persistence selected");
            Ok(Arc::new(backend))
        }
        PersistenceBackendKind::Auto => {
            if config.database_url.is_none() {
                info!(
                    backend = "memory",
                    "💾 No database URL configured, using in-memory state persistence"
                );
                return Ok(Arc::new(InMemoryStatePersistence::new()));
            }

            match connect_postgres(config).await {
                Ok(backend) => {
                    info!(backend = "postgres", "💾 State persistence selected");
                    Ok(Arc::new(backend))
                }
                Err(error) => {
                    warn!(
                        error = %error,
                        "Postgres state persistence unavailable, falling back to in-memory store"
                    );
                    Ok(Arc::new(InMemoryStatePersistence::new()))
                }
            }
        }
    }
}

async fn connect_postgres(config: &PersistenceConfig) -> PersistenceResult<PgStatePersistence> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| PersistenceError::Backend {
            reason: "postgres backend requires persistence.database_url".to_string(),
        })?;

    let backend = PgStatePersistence::connect(
        url,
        config.max_connections,
        &config.table_name,
        config.ttl(),
    )
    .await?;
    backend.ensure_schema().await?;
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{ProcessingPhase, ProcessingState, StateTransition};
    use serde_json::json;

    fn sample_context() -> StateMachineContext {
        let mut context = StateMachineContext::new(ConversationId::from(42));
        context.record_transition(StateTransition::new(
            ProcessingState::Ready,
            ProcessingState::Processing,
            "MESSAGE_RECEIVED",
            Some(json!({"source": "test"})),
        ));
        context.current_state = ProcessingState::Processing;
        context.previous_state = Some(ProcessingState::Ready);
        context.current_phase = Some(ProcessingPhase::Analysis);
        context
            .state_data
            .insert("intent".to_string(), json!({"name": "weather", "score": 0.5}));
        context
    }

    #[tokio::test]
    async fn test_memory_round_trip_is_exact() {
        let store = InMemoryStatePersistence::new();
        let id = ConversationId::from(42);
        let context = sample_context();

        store.save(&id, &context).await.unwrap();
        assert!(store.exists(&id).await.unwrap());
        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded, context);
    }

    #[tokio::test]
    async fn test_memory_delete_and_missing_load() {
        let store = InMemoryStatePersistence::new();
        let id = ConversationId::from("gone");
        assert!(store.load(&id).await.unwrap().is_none());

        store.save(&id, &sample_context()).await.unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(!store.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_cleanup() {
        let store = InMemoryStatePersistence::new();
        store
            .save(&ConversationId::from(1), &sample_context())
            .await
            .unwrap();
        store
            .save(&ConversationId::from(2), &sample_context())
            .await
            .unwrap();

        assert_eq!(store.cleanup(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(store.cleanup(Duration::ZERO).await.unwrap(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_record_shape_is_camel_case_with_version() {
        let value = PersistedStateRecord::encode(&sample_context()).unwrap();
        assert_eq!(value["schemaVersion"], 1);
        assert_eq!(value["conversationId"], "42");
        assert_eq!(value["currentState"], "processing");
        assert_eq!(value["previousState"], "ready");
        assert_eq!(value["currentPhase"], "analysis");
        assert!(value["lastTransitionTime"].is_string());
        assert_eq!(value["transitionHistory"][0]["trigger"], "MESSAGE_RECEIVED");
    }

    #[test]
    fn test_unknown_schema_version_rejected() {
        let mut value = PersistedStateRecord::encode(&sample_context()).unwrap();
        value["schemaVersion"] = json!(2);

        let err = PersistedStateRecord::decode(value).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UnsupportedSchemaVersion {
                found: 2,
                expected: 1
            }
        ));
    }

    #[test]
    fn test_missing_schema_version_rejected() {
        let err = PersistedStateRecord::decode(json!({"conversationId": "1"})).unwrap_err();
        assert!(matches!(err, PersistenceError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn test_auto_without_url_selects_memory() {
        let config = PersistenceConfig::default();
        let backend = connect_persistence(&config).await.unwrap();
        assert_eq!(backend.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_explicit_postgres_without_url_is_error() {
        let config = PersistenceConfig {
            backend: PersistenceBackendKind::Postgres,
            database_url: None,
            ..Default::default()
        };
        assert!(connect_persistence(&config).await.is_err());
    }
}
