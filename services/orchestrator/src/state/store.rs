//! SQLite-based cluster state store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use autok3s_types::{Cluster, ClusterState, ClusterStatus, Metadata, Node, SshCredentials, Status};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;

use super::ClusterStore;

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode cluster state: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to create state directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state: {0}")]
    Invalid(String),
}

const COLUMNS: &str = "name, provider, status, metadata, master_nodes, worker_nodes, ssh, options, created_at, updated_at";

/// SQLite state store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a state store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // WAL lets `list` readers in other processes proceed during writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Invalid("connection lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
                name TEXT NOT NULL,
                provider TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata TEXT NOT NULL,
                master_nodes TEXT NOT NULL,
                worker_nodes TEXT NOT NULL,
                ssh TEXT NOT NULL,
                options TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (name, provider)
            );

            CREATE INDEX IF NOT EXISTS idx_clusters_status ON clusters(status);
            "#,
        )?;

        debug!("State store schema initialized");
        Ok(())
    }

    /// Clusters currently in `status`.
    pub fn list_by_status(&self, status: ClusterStatus) -> Result<Vec<ClusterState>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clusters WHERE status = ?1 ORDER BY created_at, name",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![status.as_str()], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::decode).collect()
    }
}

/// Columns as stored, decoded outside the rusqlite row callback.
struct RawRow {
    status: String,
    metadata: String,
    master_nodes: String,
    worker_nodes: String,
    ssh: String,
    options: String,
    created_at: i64,
    updated_at: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            status: row.get(2)?,
            metadata: row.get(3)?,
            master_nodes: row.get(4)?,
            worker_nodes: row.get(5)?,
            ssh: row.get(6)?,
            options: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<ClusterState, StoreError> {
        let status: ClusterStatus = self
            .status
            .parse()
            .map_err(|e| StoreError::Invalid(format!("{}", e)))?;
        let metadata: Metadata = serde_json::from_str(&self.metadata)?;
        let master_nodes: Vec<Node> = serde_json::from_str(&self.master_nodes)?;
        let worker_nodes: Vec<Node> = serde_json::from_str(&self.worker_nodes)?;
        let ssh: SshCredentials = serde_json::from_str(&self.ssh)?;
        let options: serde_json::Value = serde_json::from_str(&self.options)?;

        Ok(ClusterState {
            cluster: Cluster {
                metadata,
                status: Status {
                    master_nodes,
                    worker_nodes,
                },
                ssh,
                options,
            },
            status,
            created_at: timestamp(self.created_at)?,
            updated_at: timestamp(self.updated_at)?,
        })
    }
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Invalid(format!("timestamp out of range: {}", millis)))
}

impl ClusterStore for SqliteStore {
    fn save_cluster_state(&self, state: &ClusterState) -> Result<(), StoreError> {
        let cluster = &state.cluster;
        self.conn()?.execute(
            r#"
            INSERT INTO clusters (name, provider, status, metadata, master_nodes, worker_nodes, ssh, options, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(name, provider) DO UPDATE SET
                status = excluded.status,
                metadata = excluded.metadata,
                master_nodes = excluded.master_nodes,
                worker_nodes = excluded.worker_nodes,
                ssh = excluded.ssh,
                options = excluded.options,
                updated_at = excluded.updated_at
            "#,
            params![
                state.name(),
                state.provider(),
                state.status.as_str(),
                serde_json::to_string(&cluster.metadata)?,
                serde_json::to_string(&cluster.status.master_nodes)?,
                serde_json::to_string(&cluster.status.worker_nodes)?,
                serde_json::to_string(&cluster.ssh)?,
                serde_json::to_string(&cluster.options)?,
                state.created_at.timestamp_millis(),
                state.updated_at.timestamp_millis(),
            ],
        )?;
        debug!(cluster = %state.name(), provider = %state.provider(), status = %state.status, "Saved cluster state");
        Ok(())
    }

    fn get_cluster(&self, name: &str, provider: &str) -> Result<Option<ClusterState>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clusters WHERE name = ?1 AND provider = ?2",
            COLUMNS
        ))?;
        stmt.query_row(params![name, provider], RawRow::from_row)
            .optional()?
            .map(RawRow::decode)
            .transpose()
    }

    fn delete_cluster(&self, name: &str, provider: &str) -> Result<bool, StoreError> {
        let deleted = self.conn()?.execute(
            "DELETE FROM clusters WHERE name = ?1 AND provider = ?2",
            params![name, provider],
        )?;
        Ok(deleted > 0)
    }

    fn list_clusters(&self) -> Result<Vec<ClusterState>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clusters ORDER BY created_at, name",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::decode).collect()
    }
}
