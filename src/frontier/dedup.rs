use crate::storage::{Storage, StorageResult};
use crate::url::fingerprint;
use std::sync::Arc;
use url::Url;

/// The set of URL fingerprints already accepted into the frontier
///
/// A thin view over the backing store's seen set, so a restarted crawl on
/// the same namespace resumes with the same dedup state. Store failures are
/// returned as-is; there is no local fallback.
#[derive(Clone)]
pub struct DedupStore {
    storage: Arc<dyn Storage>,
}

impl DedupStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Atomically tests and sets a fingerprint
    ///
    /// Returns `true` iff the fingerprint was not seen before.
    pub async fn mark_if_new(&self, fingerprint: &str) -> StorageResult<bool> {
        self.storage.mark_if_new(fingerprint).await
    }

    /// Marks a normalized URL as seen
    pub async fn mark_url_if_new(&self, url: &Url) -> StorageResult<bool> {
        self.mark_if_new(&fingerprint(url)).await
    }

    /// Checks whether a normalized URL has been seen
    pub async fn is_seen(&self, url: &Url) -> StorageResult<bool> {
        self.storage.is_seen(&fingerprint(url)).await
    }

    pub async fn seen_count(&self) -> StorageResult<u64> {
        self.storage.seen_count().await
    }
}
