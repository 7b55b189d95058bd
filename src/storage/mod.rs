//! Storage module for the persistent frontier
//!
//! This module holds the backends that persist the dedup set and the job
//! queue outside the crawler process:
//! - Redis, for crawls shared between processes or machines
//! - SQLite, for single-host crawls that should survive restarts

mod redis_store;
mod schema;
mod sqlite;
mod traits;

pub use redis_store::RedisStorage;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::{StoreBackend, StoreConfig};
use std::path::Path;
use std::sync::Arc;

/// Opens the backend selected by `config.backend`
///
/// # Returns
///
/// * `Ok(Arc<dyn Storage>)` - A connected store, shareable across workers
/// * `Err(StorageError)` - The store could not be reached or opened
pub async fn open_storage(config: &StoreConfig) -> StorageResult<Arc<dyn Storage>> {
    match config.backend {
        StoreBackend::Redis => Ok(Arc::new(RedisStorage::connect(config).await?)),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStorage::open(
            Path::new(&config.path),
            &config.prefix,
        )?)),
    }
}

/// Closes a store exactly once when dropped
///
/// Holding one of these for the lifetime of a run guarantees the connection
/// is released on normal return, on an early `?` return, on panic unwinding,
/// and when the run future itself is dropped.
pub struct StoreGuard {
    storage: Arc<dyn Storage>,
    closed: bool,
}

impl StoreGuard {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            closed: false,
        }
    }

    /// Closes the store now, reporting a failure through the log
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.storage.close() {
            Ok(()) => tracing::debug!("Store connection closed"),
            Err(e) => tracing::warn!("Failed to close store connection: {}", e),
        }
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        self.release();
    }
}
