//! SQLite storage implementation
//!
//! A single-file backend for crawls that do not need a network store. Several
//! processes may share one file; every compound step runs inside an
//! `IMMEDIATE` transaction so it holds the write lock for its whole duration.
//!
//! rusqlite is blocking, and a statement may wait up to the busy timeout for
//! another process to release the file. Every call therefore runs on tokio's
//! blocking pool so a locked file never stalls the runtime's worker threads.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Arc<Mutex<Option<Connection>>>,
    namespace: Arc<str>,
}

impl SqliteStorage {
    /// Opens (or creates) the database file at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `namespace` - Separates crawls sharing one file
    pub fn open(path: &Path, namespace: &str) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Self::from_connection(conn, namespace)
    }

    /// Creates an in-memory database
    pub fn open_in_memory(namespace: &str) -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, namespace)
    }

    fn from_connection(conn: Connection, namespace: &str) -> StorageResult<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            namespace: Arc::from(namespace),
        })
    }

    /// Runs `f` with the open connection on the blocking pool, or fails with
    /// `Closed`
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> StorageResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let namespace = self.namespace.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                Some(conn) => f(conn, &namespace),
                None => Err(StorageError::Closed),
            }
        })
        .await?
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn mark_if_new(&self, fingerprint: &str) -> StorageResult<bool> {
        let fingerprint = fingerprint.to_string();
        self.with_conn(move |conn, namespace| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO seen (namespace, fingerprint, seen_at) VALUES (?1, ?2, ?3)",
                params![namespace, fingerprint, Utc::now().to_rfc3339()],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn is_seen(&self, fingerprint: &str) -> StorageResult<bool> {
        let fingerprint = fingerprint.to_string();
        self.with_conn(move |conn, namespace| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM seen WHERE namespace = ?1 AND fingerprint = ?2",
                    params![namespace, fingerprint],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn seen_count(&self) -> StorageResult<u64> {
        self.with_conn(|conn, namespace| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM seen WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn push_if_new(&self, fingerprint: &str, payload: &str) -> StorageResult<bool> {
        let fingerprint = fingerprint.to_string();
        let payload = payload.to_string();
        self.with_conn(move |conn, namespace| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO seen (namespace, fingerprint, seen_at) VALUES (?1, ?2, ?3)",
                params![namespace, fingerprint, Utc::now().to_rfc3339()],
            )?;

            if inserted == 1 {
                tx.execute(
                    "INSERT INTO queue (namespace, position, payload)
                     VALUES (?1, (SELECT COALESCE(MAX(position), 0) + 1 FROM queue WHERE namespace = ?1), ?2)",
                    params![namespace, payload],
                )?;
            }

            tx.commit()?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn pop(&self) -> StorageResult<Option<String>> {
        self.with_conn(|conn, namespace| {
            let payload: Option<String> = conn
                .query_row(
                    "DELETE FROM queue WHERE id = (
                        SELECT id FROM queue WHERE namespace = ?1 ORDER BY position ASC LIMIT 1
                     ) RETURNING payload",
                    params![namespace],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(payload)
        })
        .await
    }

    async fn requeue(&self, payload: &str) -> StorageResult<()> {
        let payload = payload.to_string();
        self.with_conn(move |conn, namespace| {
            conn.execute(
                "INSERT INTO queue (namespace, position, payload)
                 VALUES (?1, (SELECT COALESCE(MIN(position), 0) - 1 FROM queue WHERE namespace = ?1), ?2)",
                params![namespace, payload],
            )?;
            Ok(())
        })
        .await
    }

    async fn len(&self) -> StorageResult<u64> {
        self.with_conn(|conn, namespace| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM queue WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.with_conn(|conn, namespace| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM queue WHERE namespace = ?1", params![namespace])?;
            tx.execute("DELETE FROM seen WHERE namespace = ?1", params![namespace])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    fn close(&self) -> StorageResult<()> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match conn {
            Some(conn) => conn.close().map_err(|(_, e)| StorageError::Sqlite(e)),
            None => Ok(()),
        }
    }
}
