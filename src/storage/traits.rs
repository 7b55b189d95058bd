//! Storage traits and error types
//!
//! This module defines the trait interface for frontier storage backends and
//! associated error types.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid store address: {0}")]
    InvalidAddress(String),

    #[error("Storage connection is closed")]
    Closed,

    #[error("Blocking store task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for frontier storage backends
///
/// A backend holds two structures per namespace: a set of seen fingerprints
/// and an ordered list of serialized jobs. Every method must be atomic with
/// respect to other callers, including callers in other processes sharing
/// the same namespace; implementations are shared across workers behind an
/// `Arc`.
#[async_trait]
pub trait Storage: Send + Sync {
    // ===== Dedup set =====

    /// Adds a fingerprint to the seen set
    ///
    /// Returns `true` iff the fingerprint was not already present.
    async fn mark_if_new(&self, fingerprint: &str) -> StorageResult<bool>;

    /// Checks membership without modifying the set
    async fn is_seen(&self, fingerprint: &str) -> StorageResult<bool>;

    /// Number of fingerprints in the seen set
    async fn seen_count(&self) -> StorageResult<u64>;

    // ===== Queue =====

    /// Marks `fingerprint` seen and appends `payload` to the tail of the
    /// queue, as one atomic step
    ///
    /// Returns `false` and appends nothing when the fingerprint was already
    /// seen.
    async fn push_if_new(&self, fingerprint: &str, payload: &str) -> StorageResult<bool>;

    /// Removes and returns the head of the queue
    async fn pop(&self) -> StorageResult<Option<String>>;

    /// Puts a payload back at the head of the queue, bypassing the seen set
    async fn requeue(&self, payload: &str) -> StorageResult<()>;

    /// Current queue depth
    async fn len(&self) -> StorageResult<u64>;

    // ===== Lifecycle =====

    /// Deletes the queue and the seen set of this namespace
    async fn clear(&self) -> StorageResult<()>;

    /// Releases the connection
    ///
    /// Idempotent: a second call is a no-op. Every other method returns
    /// `StorageError::Closed` afterwards.
    fn close(&self) -> StorageResult<()>;
}
