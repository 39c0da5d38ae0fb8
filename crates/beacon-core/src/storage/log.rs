//! Append-only ordered log persisted as one delimited row per namespace.
//!
//! Entries are percent-encoded before joining so an entry can never contain
//! the delimiter itself.

use std::sync::Arc;

use sqlx::{Executor, Sqlite, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::error::Result;

/// Separator between entries in the stored row.
pub const DELIMITER: &str = ":::";

/// Durable FIFO of opaque string entries.
///
/// Every mutation is a read-modify-write of the namespace row performed under
/// the log's mutex and inside a single transaction, so a crash leaves either
/// the old or the new sequence on disk. Empty segments left by a torn write
/// and segments that do not decode are skipped when reading.
pub struct PersistentLog {
    pool: Arc<SqlitePool>,
    namespace: &'static str,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for PersistentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentLog").field("namespace", &self.namespace).finish()
    }
}

impl PersistentLog {
    /// Creates a log over `namespace` in the shared pool.
    pub fn new(pool: Arc<SqlitePool>, namespace: &'static str) -> Self {
        Self { pool, namespace, write_lock: Mutex::new(()) }
    }

    /// Returns the namespace this log is stored under.
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Appends `item` at the tail.
    ///
    /// An empty item is ignored.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the write fails.
    pub async fn append(&self, item: &str) -> Result<()> {
        if item.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut entries = load(&mut *tx, self.namespace).await?;
        entries.push(item.to_string());
        store(&mut *tx, self.namespace, &entries).await?;

        tx.commit().await?;
        trace!(namespace = self.namespace, len = entries.len(), "appended entry");
        Ok(())
    }

    /// Removes the first entry equal to `item`.
    ///
    /// Returns whether an entry was removed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the read or write fails.
    pub async fn remove_first_match(&self, item: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut entries = load(&mut *tx, self.namespace).await?;
        let Some(position) = entries.iter().position(|entry| entry == item) else {
            return Ok(false);
        };
        entries.remove(position);
        store(&mut *tx, self.namespace, &entries).await?;

        tx.commit().await?;
        trace!(namespace = self.namespace, len = entries.len(), "removed entry");
        Ok(true)
    }

    /// Removes and returns every entry, oldest first.
    ///
    /// The read and the delete happen in one transaction under the write
    /// lock, so concurrent callers never receive the same entry twice.
    /// Entries appended afterwards stay for the next call.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the read or delete fails.
    pub async fn take_all(&self) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let entries = load(&mut *tx, self.namespace).await?;
        if !entries.is_empty() {
            store(&mut *tx, self.namespace, &[]).await?;
        }

        tx.commit().await?;
        debug!(namespace = self.namespace, taken = entries.len(), "drained log");
        Ok(entries)
    }

    /// Returns a snapshot of all entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the read fails.
    pub async fn read_all(&self) -> Result<Vec<String>> {
        load(&*self.pool, self.namespace).await
    }

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the read fails.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.read_all().await?.len())
    }

    /// Returns true when the log holds no entries.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the read fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.read_all().await?.is_empty())
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the delete fails.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM kv_store WHERE namespace = ?")
            .bind(self.namespace)
            .execute(&*self.pool)
            .await?;

        debug!(namespace = self.namespace, "cleared log");
        Ok(())
    }
}

async fn load<'e, E>(executor: E, namespace: &str) -> Result<Vec<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM kv_store WHERE namespace = ?")
            .bind(namespace)
            .fetch_optional(executor)
            .await?;

    Ok(value.map(|joined| split_entries(&joined)).unwrap_or_default())
}

async fn store<'e, E>(executor: E, namespace: &str, entries: &[String]) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    if entries.is_empty() {
        sqlx::query("DELETE FROM kv_store WHERE namespace = ?")
            .bind(namespace)
            .execute(executor)
            .await?;
    } else {
        sqlx::query(
            "INSERT INTO kv_store (namespace, value) VALUES (?, ?)
             ON CONFLICT(namespace) DO UPDATE SET value = excluded.value",
        )
        .bind(namespace)
        .bind(join_entries(entries))
        .execute(executor)
        .await?;
    }

    Ok(())
}

fn join_entries(entries: &[String]) -> String {
    entries.iter().map(|entry| urlencoding::encode(entry)).collect::<Vec<_>>().join(DELIMITER)
}

fn split_entries(joined: &str) -> Vec<String> {
    joined
        .split(DELIMITER)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| match urlencoding::decode(segment) {
            Ok(entry) => Some(entry.into_owned()),
            Err(e) => {
                warn!(error = %e, "skipping undecodable log entry");
                None
            },
        })
        .collect()
}
