//! Redis storage implementation
//!
//! Keys used by a namespace `<prefix>`:
//! - `<prefix>:seen`  SET of fingerprints
//! - `<prefix>:queue` LIST of serialized jobs, consumed from the left

use crate::config::StoreConfig;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::{Mutex, PoisonError};
use url::Url;

/// Marks the fingerprint seen and appends the job only if it was new
const PUSH_IF_NEW_SCRIPT: &str = r#"
    if redis.call("SADD", KEYS[1], ARGV[1]) == 1 then
        redis.call("RPUSH", KEYS[2], ARGV[2])
        return 1
    end
    return 0
"#;

/// Redis storage backend
pub struct RedisStorage {
    conn: Mutex<Option<MultiplexedConnection>>,
    seen_key: String,
    queue_key: String,
    push_script: redis::Script,
}

impl RedisStorage {
    /// Connects to the Redis instance described by `config`
    ///
    /// # Returns
    ///
    /// * `Ok(RedisStorage)` - Connected and ready
    /// * `Err(StorageError)` - Bad address or the server is unreachable
    pub async fn connect(config: &StoreConfig) -> StorageResult<Self> {
        let url = connection_url(config)?;
        let client = redis::Client::open(url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;

        tracing::debug!(
            "Connected to redis at {} (db {}, prefix '{}')",
            config.address,
            config.db,
            config.prefix
        );

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            seen_key: format!("{}:seen", config.prefix),
            queue_key: format!("{}:queue", config.prefix),
            push_script: redis::Script::new(PUSH_IF_NEW_SCRIPT),
        })
    }

    fn connection(&self) -> StorageResult<MultiplexedConnection> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StorageError::Closed)
    }
}

/// Builds `redis://[:password@]address/db` with the password percent-encoded
fn connection_url(config: &StoreConfig) -> StorageResult<Url> {
    let mut url = Url::parse(&format!("redis://{}/{}", config.address, config.db))
        .map_err(|e| StorageError::InvalidAddress(format!("{}: {}", config.address, e)))?;

    if !config.password.is_empty() {
        url.set_password(Some(&config.password))
            .map_err(|_| StorageError::InvalidAddress(config.address.clone()))?;
    }

    Ok(url)
}

#[async_trait]
impl Storage for RedisStorage {
    async fn mark_if_new(&self, fingerprint: &str) -> StorageResult<bool> {
        let mut conn = self.connection()?;
        let added: i64 = conn.sadd(&self.seen_key, fingerprint).await?;
        Ok(added == 1)
    }

    async fn is_seen(&self, fingerprint: &str) -> StorageResult<bool> {
        let mut conn = self.connection()?;
        let seen: bool = conn.sismember(&self.seen_key, fingerprint).await?;
        Ok(seen)
    }

    async fn seen_count(&self) -> StorageResult<u64> {
        let mut conn = self.connection()?;
        let count: u64 = conn.scard(&self.seen_key).await?;
        Ok(count)
    }

    async fn push_if_new(&self, fingerprint: &str, payload: &str) -> StorageResult<bool> {
        let mut conn = self.connection()?;
        let pushed: i64 = self
            .push_script
            .key(&self.seen_key)
            .key(&self.queue_key)
            .arg(fingerprint)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(pushed == 1)
    }

    async fn pop(&self) -> StorageResult<Option<String>> {
        let mut conn = self.connection()?;
        let payload: Option<String> = conn.lpop(&self.queue_key, None).await?;
        Ok(payload)
    }

    async fn requeue(&self, payload: &str) -> StorageResult<()> {
        let mut conn = self.connection()?;
        conn.lpush::<_, _, ()>(&self.queue_key, payload).await?;
        Ok(())
    }

    async fn len(&self) -> StorageResult<u64> {
        let mut conn = self.connection()?;
        let len: u64 = conn.llen(&self.queue_key).await?;
        Ok(len)
    }

    async fn clear(&self) -> StorageResult<()> {
        let mut conn = self.connection()?;
        conn.del::<_, ()>(vec![self.seen_key.as_str(), self.queue_key.as_str()])
            .await?;
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        // Dropping the last multiplexed handle shuts the connection down
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
