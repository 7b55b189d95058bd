use crate::frontier::dedup::DedupStore;
use crate::frontier::job::Job;
use crate::storage::{Storage, StorageResult};
use crate::url::{fingerprint, normalize_url};
use crate::CrawlError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Notify;
use url::Url;

/// Outcome of a batch push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// URLs appended to the queue
    pub queued: usize,
    /// URLs whose fingerprint was already seen
    pub duplicates: usize,
    /// Blank or invalid URLs that were skipped
    pub rejected: usize,
}

/// The persistent, deduplicated queue of pending jobs
///
/// Every mutation is a single atomic store operation, so any number of
/// workers, callbacks and processes may push and pop concurrently.
pub struct FrontierQueue {
    storage: Arc<dyn Storage>,
    dedup: DedupStore,
    default_headers: BTreeMap<String, String>,
    pushed: Arc<Notify>,
}

impl FrontierQueue {
    pub fn new(storage: Arc<dyn Storage>, default_headers: BTreeMap<String, String>) -> Self {
        Self {
            dedup: DedupStore::new(storage.clone()),
            storage,
            default_headers,
            pushed: Arc::new(Notify::new()),
        }
    }

    /// Normalizes `url` and appends it unless its fingerprint was seen
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The URL was new and is now queued
    /// * `Ok(false)` - The URL was already seen; nothing was appended
    /// * `Err(CrawlError::Url)` - The URL could not be normalized
    /// * `Err(CrawlError::Storage)` - The backing store failed
    pub async fn push(&self, url: &str) -> Result<bool, CrawlError> {
        let normalized = normalize_url(url)?;
        Ok(self.push_normalized(&normalized).await?)
    }

    async fn push_normalized(&self, url: &Url) -> StorageResult<bool> {
        let job = Job::new(url, &self.default_headers);
        let queued = self
            .storage
            .push_if_new(&fingerprint(url), &job.to_payload()?)
            .await?;

        if queued {
            tracing::trace!("Queued {}", url);
            self.pushed.notify_one();
        }
        Ok(queued)
    }

    /// Pushes every URL in `urls`
    ///
    /// Blank and invalid URLs are logged and skipped. A store failure aborts
    /// the batch and is returned; URLs before it stay queued.
    pub async fn push_multi<I, S>(&self, urls: I) -> Result<PushReport, CrawlError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = PushReport::default();

        for url in urls {
            let url = url.as_ref();
            if url.trim().is_empty() {
                report.rejected += 1;
                continue;
            }

            let normalized = match normalize_url(url) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("Skipping URL {:?}: {}", url, e);
                    report.rejected += 1;
                    continue;
                }
            };

            if self.push_normalized(&normalized).await? {
                report.queued += 1;
            } else {
                report.duplicates += 1;
            }
        }

        Ok(report)
    }

    /// Removes and returns the head job without waiting
    ///
    /// A payload that cannot be decoded is logged and dropped, and the next
    /// one is tried.
    pub async fn pop(&self) -> StorageResult<Option<Job>> {
        while let Some(payload) = self.storage.pop().await? {
            match Job::from_payload(&payload) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => tracing::warn!("Dropping undecodable job {:?}: {}", payload, e),
            }
        }
        Ok(None)
    }

    /// Puts a popped job back at the head of the queue
    pub async fn requeue(&self, job: &Job) -> StorageResult<()> {
        self.storage.requeue(&job.to_payload()?).await?;
        self.pushed.notify_one();
        Ok(())
    }

    /// Approximate number of queued jobs
    pub async fn len(&self) -> StorageResult<u64> {
        self.storage.len().await
    }

    pub async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    /// Wakes one waiting worker per successful push or requeue
    pub fn pushed(&self) -> &Notify {
        &self.pushed
    }
}

/// The callback-facing façade over the frontier
///
/// One handle exists per crawl run; clones share it. Safe to use from any
/// number of callbacks at once.
#[derive(Clone)]
pub struct QueueHandle {
    queue: Arc<FrontierQueue>,
}

impl QueueHandle {
    pub fn new(queue: Arc<FrontierQueue>) -> Self {
        Self { queue }
    }

    /// See [`FrontierQueue::push`]
    pub async fn push(&self, url: &str) -> Result<bool, CrawlError> {
        self.queue.push(url).await
    }

    /// See [`FrontierQueue::push_multi`]
    pub async fn push_multi<I, S>(&self, urls: I) -> Result<PushReport, CrawlError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.queue.push_multi(urls).await
    }

    /// Records `url` as seen without queueing it
    ///
    /// Returns `true` if it was not seen before.
    pub async fn mark_seen(&self, url: &str) -> Result<bool, CrawlError> {
        let normalized = normalize_url(url)?;
        Ok(self.queue.dedup().mark_url_if_new(&normalized).await?)
    }

    pub async fn len(&self) -> Result<u64, CrawlError> {
        Ok(self.queue.len().await?)
    }
}
