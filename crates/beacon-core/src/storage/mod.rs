//! Durable storage for queued requests and pending events.
//!
//! Both logs live in a single SQLite table keyed by namespace. Each log is
//! one row whose value is the `:::`-joined sequence of its entries, so a
//! read-modify-write of a log is one row update inside one transaction.
//!
//! The pool holds a single connection. Writes from the two logs are then
//! serialized by SQLite's connection rather than racing for the write lock.
//!
//! All persistence goes through `PersistentLog`. Nothing else in the
//! workspace issues SQL against the `kv_store` table.

use std::{path::Path, str::FromStr, sync::Arc};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use tracing::debug;

pub mod log;

pub use log::PersistentLog;

use crate::error::Result;

/// Namespace of the outbound request log.
pub const CONNECTIONS_NAMESPACE: &str = "CONNECTIONS";

/// Namespace of the pending event log.
pub const EVENTS_NAMESPACE: &str = "EVENTS";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS kv_store (
    namespace TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)";

/// Container for the two persistent logs sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    pool: Arc<SqlitePool>,

    /// Fully encoded requests awaiting delivery, oldest first.
    pub connections: Arc<PersistentLog>,

    /// Serialized events not yet folded into a request.
    pub events: Arc<PersistentLog>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Opens (creating if missing) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the file cannot be opened or the
    /// schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        debug!(path = %path.as_ref().display(), "opened storage");

        Self::from_pool(pool).await
    }

    /// Connects using a `sqlite:` URL.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the URL is invalid or unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

        Self::from_pool(pool).await
    }

    /// Creates a throwaway in-memory database.
    ///
    /// The pool is pinned to a single connection that never expires, since
    /// every new SQLite memory connection is a separate empty database.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the schema cannot be created.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the schema cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;

        let pool = Arc::new(pool);
        Ok(Self {
            connections: Arc::new(PersistentLog::new(pool.clone(), CONNECTIONS_NAMESPACE)),
            events: Arc::new(PersistentLog::new(pool.clone(), EVENTS_NAMESPACE)),
            pool,
        })
    }

    /// Returns the shared connection pool.
    pub fn pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }

    /// Verifies the database answers queries.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;

        Ok(())
    }

    /// Empties both logs.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if either log cannot be cleared.
    pub async fn clear_all(&self) -> Result<()> {
        self.connections.clear().await?;
        self.events.clear().await
    }
}
