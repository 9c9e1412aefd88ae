use super::context::{ConversationId, StateMachineContext};
use super::errors::{PersistenceError, PersistenceResult};
use super::persistence::{PersistedStateRecord, StatePersistence};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Durable snapshot store backed by a Postgres table.
///
/// Each row carries an `expires_at` set at write time from the configured
/// TTL; expired rows are invisible to `load` and `exists` and are removed by
/// `cleanup`.
#[derive(Debug, Clone)]
pub struct PgStatePersistence {
    pool: PgPool,
    table: String,
    ttl: Duration,
}

impl PgStatePersistence {
    /// Connect a new pool to `database_url`
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        table: &str,
        ttl: Duration,
    ) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Self::with_pool(pool, table, ttl)
    }

    /// Wrap an existing pool
    pub fn with_pool(pool: PgPool, table: &str, ttl: Duration) -> PersistenceResult<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
            ttl,
        })
    }

    /// Create the snapshot table and its expiry index if missing
    pub async fn ensure_schema(&self) -> PersistenceResult<()> {
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                conversation_id TEXT PRIMARY KEY,
                record JSONB NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            table = self.table
        );
        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_expires_at_idx ON {table} (expires_at)",
            table = self.table
        );

        sqlx::query(&create_table).execute(&self.pool).await?;
        sqlx::query(&create_index).execute(&self.pool).await?;

        info!(table = %self.table, "State snapshot table ready");
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn expires_at(&self) -> PersistenceResult<chrono::DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|e| PersistenceError::Backend {
            reason: format!("TTL out of range: {e}"),
        })?;
        Ok(Utc::now() + ttl)
    }
}

#[async_trait]
impl StatePersistence for PgStatePersistence {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn save(
        &self,
        conversation_id: &ConversationId,
        snapshot: &StateMachineContext,
    ) -> PersistenceResult<()> {
        let started = Instant::now();
        let record = PersistedStateRecord::encode(snapshot)?;
        let sql = format!(
            r#"
            INSERT INTO {table} (conversation_id, record, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (conversation_id)
            DO UPDATE SET record = EXCLUDED.record,
                          expires_at = EXCLUDED.expires_at,
                          updated_at = NOW()
            "#,
            table = self.table
        );

        sqlx::query(&sql)
            .bind(conversation_id.as_str())
            .bind(record)
            .bind(self.expires_at()?)
            .execute(&self.pool)
            .await?;

        debug!(
            conversation_id = %conversation_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "Saved state snapshot"
        );
        Ok(())
    }

    async fn load(
        &self,
        conversation_id: &ConversationId,
    ) -> PersistenceResult<Option<StateMachineContext>> {
        let sql = format!(
            "SELECT record FROM {table} WHERE conversation_id = $1 AND expires_at > NOW()",
            table = self.table
        );

        let record: Option<Value> = sqlx::query_scalar(&sql)
            .bind(conversation_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        record.map(PersistedStateRecord::decode).transpose()
    }

    async fn delete(&self, conversation_id: &ConversationId) -> PersistenceResult<bool> {
        let sql = format!(
            "DELETE FROM {table} WHERE conversation_id = $1",
            table = self.table
        );
        let result = sqlx::query(&sql)
            .bind(conversation_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, conversation_id: &ConversationId) -> PersistenceResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE conversation_id = $1 AND expires_at > NOW())",
            table = self.table
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(conversation_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn cleanup(&self, ttl: Duration) -> PersistenceResult<usize> {
        let sql = format!(
            r#"
            DELETE FROM {table}
            WHERE expires_at <= NOW()
               OR updated_at < NOW() - ($1::double precision * INTERVAL '1 second')
            "#,
            table = self.table
        );
        let result = sqlx::query(&sql)
            .bind(ttl.as_secs_f64())
            .execute(&self.pool)
            .await?;

        let removed = usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
        debug!(removed = removed, backend = "postgres", "Snapshot cleanup complete");
        Ok(removed)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed
fn validate_table_name(table: &str) -> PersistenceResult<()> {
    let valid = !table.is_empty()
        && table.len() <= 63
        && table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(PersistenceError::Backend {
            reason: format!("invalid table name: {table:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("conversation_state_snapshots").is_ok());
        assert!(validate_table_name("_snapshots2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1table").is_err());
        assert!(validate_table_name("states; DROP TABLE x").is_err());
    }
}
