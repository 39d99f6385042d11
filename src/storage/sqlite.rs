use super::{
    error::Result, error::StorageError, CreateOutcome, ExpiredDeadline, HistoryStore,
    InstanceRecord, NewInstance, SignalEnvelope, WaitRegistration,
};
use crate::core::{EventKind, HistoryEvent};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Default pool size for the SQLite connection pool.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_size: u32,
    /// Minimum number of idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Maximum time to wait for a connection from the pool.
    pub connection_timeout: Duration,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// Idle timeout for connections.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            max_lifetime: None,
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
        }
    }
}

/// SQLite-based history store with connection pooling.
///
/// This is the durable backend: the event log, open waits, and the signal
/// inbox all live in one database file, so an append and its bookkeeping
/// commit atomically. WAL journal mode allows readers to proceed while one
/// writer appends; SQLite's single-writer discipline backs the per-instance
/// append serialization the engine relies on.
pub struct SqliteHistoryStore {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteHistoryStore {
    /// Creates a new SQLite history store with the specified database path.
    ///
    /// Uses default pool configuration.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, PoolConfig::default()).await
    }

    /// Creates a new SQLite history store with custom pool configuration.
    pub async fn with_config(db_path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        // Configure SQLite connection options for concurrent access
        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path_str))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = Self::build_pool(connect_options, &config).await?;

        let store = Self {
            pool,
            db_path: db_path_str,
        };

        store.initialize().await?;

        Ok(store)
    }

    /// Creates an in-memory SQLite history store.
    ///
    /// For in-memory databases a single connection is used so all operations
    /// see the same database. Suitable for tests that want the SQL paths
    /// without a file on disk.
    pub async fn in_memory() -> Result<Self> {
        let mut config = PoolConfig::default();
        config.max_size = 1;
        config.min_idle = Some(0);

        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Memory)
            .synchronous(SqliteSynchronous::Normal);

        let pool = Self::build_pool(connect_options, &config).await?;

        let store = Self {
            pool,
            db_path: ":memory:".to_string(),
        };

        store.initialize().await?;

        Ok(store)
    }

    /// Builds the connection pool with the given configuration.
    async fn build_pool(
        connect_options: SqliteConnectOptions,
        config: &PoolConfig,
    ) -> Result<Pool<Sqlite>> {
        let mut builder = SqlitePoolOptions::new()
            .max_connections(config.max_size)
            .acquire_timeout(config.connection_timeout);

        if let Some(min_idle) = config.min_idle {
            builder = builder.min_connections(min_idle);
        }

        if let Some(max_lifetime) = config.max_lifetime {
            builder = builder.max_lifetime(max_lifetime);
        }

        if let Some(idle_timeout) = config.idle_timeout {
            builder = builder.idle_timeout(idle_timeout);
        }

        let pool = builder
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(pool)
    }

    /// Initialize the database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS instances (
                instance_id TEXT PRIMARY KEY,
                workflow_type TEXT NOT NULL,
                input BLOB NOT NULL,
                parent_id TEXT,
                terminal INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // Index for recovery scans
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_instances_terminal ON instances(terminal, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS history (
                instance_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                kind TEXT NOT NULL,
                PRIMARY KEY (instance_id, seq)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS waits (
                instance_id TEXT PRIMARY KEY,
                wait_name TEXT NOT NULL,
                signal_name TEXT,
                fire_at INTEGER,
                registered_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // Index for expired-deadline scans
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_waits_fire_at ON waits(fire_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS inbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_id TEXT NOT NULL,
                name TEXT NOT NULL,
                payload BLOB NOT NULL,
                received_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_inbox_instance ON inbox(instance_id, name, id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Returns the database path.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<InstanceRecord> {
        let instance_id: String = row.try_get("instance_id")?;
        let parent_id: Option<String> = row.try_get("parent_id")?;
        Ok(InstanceRecord {
            instance_id: parse_uuid(&instance_id)?,
            workflow_type: row.try_get("workflow_type")?,
            input: row.try_get("input")?,
            parent_id: parent_id.as_deref().map(parse_uuid).transpose()?,
            terminal: row.try_get::<i64, _>("terminal")? != 0,
            created_at: millis_to_datetime(row.try_get("created_at")?)?,
        })
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryEvent> {
        let instance_id: String = row.try_get("instance_id")?;
        let kind_json: String = row.try_get("kind")?;
        let kind: EventKind = serde_json::from_str(&kind_json)
            .map_err(|e| StorageError::InvalidParameter(format!("bad event payload: {}", e)))?;
        Ok(HistoryEvent {
            instance_id: parse_uuid(&instance_id)?,
            seq: row.try_get::<i64, _>("seq")? as u64,
            recorded_at: millis_to_datetime(row.try_get("recorded_at")?)?,
            kind,
        })
    }

    /// Appends within an open transaction, assigning the next sequence
    /// number and maintaining the terminal bookkeeping.
    async fn append_in_tx(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        instance_id: Uuid,
        kind: &EventKind,
    ) -> Result<HistoryEvent> {
        let id_str = instance_id.to_string();

        let terminal: Option<i64> =
            sqlx::query_scalar("SELECT terminal FROM instances WHERE instance_id = ?")
                .bind(&id_str)
                .fetch_optional(&mut **tx)
                .await?;
        match terminal {
            None => return Err(StorageError::InstanceNotFound(instance_id)),
            Some(t) if t != 0 => return Err(StorageError::InstanceTerminal(instance_id)),
            Some(_) => {}
        }

        let next_seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM history WHERE instance_id = ?")
                .bind(&id_str)
                .fetch_one(&mut **tx)
                .await?;

        let recorded_at = Utc::now();
        let kind_json = serde_json::to_string(kind)
            .map_err(|e| StorageError::InvalidParameter(format!("unencodable event: {}", e)))?;

        sqlx::query(
            "INSERT INTO history (instance_id, seq, recorded_at, kind) VALUES (?, ?, ?, ?)",
        )
        .bind(&id_str)
        .bind(next_seq)
        .bind(recorded_at.timestamp_millis())
        .bind(&kind_json)
        .execute(&mut **tx)
        .await?;

        if kind.is_terminal() {
            sqlx::query("UPDATE instances SET terminal = 1 WHERE instance_id = ?")
                .bind(&id_str)
                .execute(&mut **tx)
                .await?;
            sqlx::query("DELETE FROM waits WHERE instance_id = ?")
                .bind(&id_str)
                .execute(&mut **tx)
                .await?;
            sqlx::query("DELETE FROM inbox WHERE instance_id = ?")
                .bind(&id_str)
                .execute(&mut **tx)
                .await?;
        }

        Ok(HistoryEvent {
            instance_id,
            seq: next_seq as u64,
            recorded_at,
            kind: kind.clone(),
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StorageError::InvalidParameter(format!("bad uuid: {}", e)))
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StorageError::InvalidParameter(format!("bad timestamp: {}", ms)))
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn create_instance(&self, new: NewInstance<'_>) -> Result<CreateOutcome> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO instances (instance_id, workflow_type, input, parent_id, terminal, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(new.instance_id.to_string())
        .bind(new.workflow_type)
        .bind(new.input)
        .bind(new.parent_id.map(|id| id.to_string()))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(CreateOutcome::AlreadyExists)
        } else {
            Ok(CreateOutcome::Created)
        }
    }

    async fn get_instance(&self, instance_id: Uuid) -> Result<Option<InstanceRecord>> {
        let row = sqlx::query("SELECT * FROM instances WHERE instance_id = ?")
            .bind(instance_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list_incomplete(&self) -> Result<Vec<InstanceRecord>> {
        let rows = sqlx::query("SELECT * FROM instances WHERE terminal = 0 ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn append(&self, instance_id: Uuid, kind: EventKind) -> Result<HistoryEvent> {
        let mut tx = self.pool.begin().await?;
        let event = Self::append_in_tx(&mut tx, instance_id, &kind).await?;
        tx.commit().await?;
        Ok(event)
    }

    async fn load_history(&self, instance_id: Uuid) -> Result<Vec<HistoryEvent>> {
        let rows = sqlx::query("SELECT * FROM history WHERE instance_id = ? ORDER BY seq")
            .bind(instance_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn load_history_after(
        &self,
        instance_id: Uuid,
        after_seq: u64,
    ) -> Result<Vec<HistoryEvent>> {
        let rows =
            sqlx::query("SELECT * FROM history WHERE instance_id = ? AND seq > ? ORDER BY seq")
                .bind(instance_id.to_string())
                .bind(after_seq as i64)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn register_wait(&self, instance_id: Uuid, wait: WaitRegistration) -> Result<()> {
        let terminal: Option<i64> =
            sqlx::query_scalar("SELECT terminal FROM instances WHERE instance_id = ?")
                .bind(instance_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match terminal {
            None => return Err(StorageError::InstanceNotFound(instance_id)),
            Some(t) if t != 0 => return Err(StorageError::InstanceTerminal(instance_id)),
            Some(_) => {}
        }

        sqlx::query(
            "INSERT OR REPLACE INTO waits (instance_id, wait_name, signal_name, fire_at, registered_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(instance_id.to_string())
        .bind(&wait.wait_name)
        .bind(&wait.signal_name)
        .bind(wait.fire_at.map(|t| t.timestamp_millis()))
        .bind(wait.registered_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_open_wait(&self, instance_id: Uuid) -> Result<Option<WaitRegistration>> {
        let row = sqlx::query("SELECT * FROM waits WHERE instance_id = ?")
            .bind(instance_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let fire_at: Option<i64> = row.try_get("fire_at")?;
            Ok(WaitRegistration {
                wait_name: row.try_get("wait_name")?,
                signal_name: row.try_get("signal_name")?,
                fire_at: fire_at.map(millis_to_datetime).transpose()?,
                registered_at: millis_to_datetime(row.try_get("registered_at")?)?,
            })
        })
        .transpose()
    }

    async fn resolve_wait(
        &self,
        instance_id: Uuid,
        resolution: EventKind,
    ) -> Result<Option<HistoryEvent>> {
        let id_str = instance_id.to_string();
        let mut tx = self.pool.begin().await?;

        // Conditional delete is the claim: only one of a racing signal and
        // timer can remove the row, and only the one that removed it appends.
        let claimed = match &resolution {
            EventKind::SignalReceived { name, .. } => {
                sqlx::query("DELETE FROM waits WHERE instance_id = ? AND signal_name = ?")
                    .bind(&id_str)
                    .bind(name)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected()
            }
            EventKind::TimerFired { name } => sqlx::query(
                "DELETE FROM waits WHERE instance_id = ? AND wait_name = ? AND fire_at IS NOT NULL",
            )
            .bind(&id_str)
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            _ => 0,
        };

        if claimed == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let event = Self::append_in_tx(&mut tx, instance_id, &resolution).await?;
        tx.commit().await?;
        Ok(Some(event))
    }

    async fn buffer_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        let terminal: Option<i64> =
            sqlx::query_scalar("SELECT terminal FROM instances WHERE instance_id = ?")
                .bind(envelope.instance_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match terminal {
            None => return Err(StorageError::InstanceNotFound(envelope.instance_id)),
            // Terminated instances silently drop envelopes.
            Some(t) if t != 0 => return Ok(()),
            Some(_) => {}
        }

        sqlx::query(
            "INSERT INTO inbox (instance_id, name, payload, received_at) VALUES (?, ?, ?, ?)",
        )
        .bind(envelope.instance_id.to_string())
        .bind(&envelope.name)
        .bind(&envelope.payload)
        .bind(envelope.received_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_buffered_signal(
        &self,
        instance_id: Uuid,
        name: &str,
    ) -> Result<Option<SignalEnvelope>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, payload, received_at FROM inbox
             WHERE instance_id = ? AND name = ? ORDER BY id LIMIT 1",
        )
        .bind(instance_id.to_string())
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let envelope = SignalEnvelope {
            instance_id,
            name: name.to_string(),
            payload: row.try_get("payload")?,
            received_at: millis_to_datetime(row.try_get("received_at")?)?,
        };

        sqlx::query("DELETE FROM inbox WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(envelope))
    }

    async fn expired_deadlines(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredDeadline>> {
        let rows = sqlx::query(
            "SELECT instance_id, wait_name, fire_at FROM waits
             WHERE fire_at IS NOT NULL AND fire_at <= ? ORDER BY fire_at",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let instance_id: String = row.try_get("instance_id")?;
                Ok(ExpiredDeadline {
                    instance_id: parse_uuid(&instance_id)?,
                    wait_name: row.try_get("wait_name")?,
                    fire_at: millis_to_datetime(row.try_get("fire_at")?)?,
                })
            })
            .collect()
    }

    async fn reset(&self) -> Result<()> {
        for table in ["history", "waits", "inbox", "instances"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
