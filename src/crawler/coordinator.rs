//! Crawler coordinator - run lifecycle and worker orchestration
//!
//! This module contains the entry point of a crawl, which:
//! - Validates configuration and compiles limit rules
//! - Connects to the frontier store and seeds it
//! - Spawns the worker pool and watches it for errors and panics
//! - Releases the store exactly once, however the run ends

use crate::config::{validate, Config};
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::crawler::handler::{Handler, NoopHandler};
use crate::crawler::limiter::RateLimiter;
use crate::crawler::worker::{run_worker, WorkerContext};
use crate::frontier::FrontierQueue;
use crate::storage::{open_storage, Storage, StoreGuard};
use crate::CrawlError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Built but not started
    Idle,
    /// Workers are processing the frontier
    Running,
    /// The frontier drained and workers are exiting
    Draining,
    /// The run has ended and the store is released
    Stopped,
}

/// Totals reported when a run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Fetches started
    pub requests: u64,
    /// Fetches that produced a 2xx response
    pub responses: u64,
    /// Fetches routed to `on_error`
    pub errors: u64,
    pub elapsed: Duration,
    /// The run was stopped through its cancellation token
    pub cancelled: bool,
}

/// A configured crawl
///
/// `run` consumes the spider, so a spider runs at most once.
pub struct Spider {
    config: Config,
    handler: Arc<dyn Handler>,
    fetcher: Option<Arc<dyn Fetcher>>,
    storage: Option<Arc<dyn Storage>>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<RunState>>,
}

impl Spider {
    /// Creates a spider with the default HTTP fetcher and the store named in
    /// `config.store`
    pub fn new<H: Handler + 'static>(config: Config, handler: H) -> Self {
        Self::builder(config).handler(handler).build()
    }

    pub fn builder(config: Config) -> SpiderBuilder {
        SpiderBuilder {
            config,
            handler: None,
            fetcher: None,
            storage: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A token that stops the run when cancelled
    ///
    /// Idle waits, admission waits, delays and in-flight fetches are
    /// interrupted; interrupted jobs are put back at the head of the queue.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Observes [`RunState`] transitions
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Runs the crawl until the frontier drains, a fatal error occurs, or
    /// the run is cancelled
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - The run drained or was cancelled
    /// * `Err(CrawlError)` - Startup failed, or the first fatal error
    ///   (store failure or callback error) from any worker
    ///
    /// # Panics
    ///
    /// Re-raises a panic from a worker task once the other workers are
    /// stopped and the store is released.
    pub async fn run(self) -> Result<CrawlSummary, CrawlError> {
        let state = self.state.clone();
        let result = self.execute().await;
        state.send_replace(RunState::Stopped);
        result
    }

    async fn execute(self) -> Result<CrawlSummary, CrawlError> {
        let started = Instant::now();
        let Spider {
            config,
            handler,
            fetcher,
            storage,
            cancel,
            state,
        } = self;

        // A caller-provided store is ours to close even if startup fails
        let mut guard = storage.clone().map(StoreGuard::new);

        validate(&config)?;
        let limiter = RateLimiter::from_config(&config)?;
        for rule in limiter.rules() {
            tracing::debug!(
                "Limit rule {}: parallelism {}, delay {:?} (+{:?} random)",
                rule.glob(),
                rule.parallelism(),
                rule.delay(),
                rule.random_delay()
            );
        }

        let fetcher: Arc<dyn Fetcher> = match fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(&config.crawler)?),
        };

        let storage = match storage {
            Some(storage) => storage,
            None => {
                let storage = open_storage(&config.store).await?;
                guard = Some(StoreGuard::new(storage.clone()));
                storage
            }
        };

        let queue = Arc::new(FrontierQueue::new(
            storage,
            config.crawler.headers.clone(),
        ));

        let seeded = queue.push_multi(&config.seed.urls).await?;
        tracing::info!(
            "Seeded frontier: {} queued, {} already seen, {} rejected",
            seeded.queued,
            seeded.duplicates,
            seeded.rejected
        );

        let ctx = Arc::new(WorkerContext::new(
            queue.clone(),
            handler,
            fetcher,
            limiter,
            cancel.child_token(),
            state.clone(),
            config.crawler.idle_poll(),
            config.crawler.debug,
        ));

        state.send_replace(RunState::Running);
        tracing::info!(
            "Starting crawl with {} workers",
            config.crawler.parallelism
        );

        let mut workers = JoinSet::new();
        for id in 0..config.crawler.parallelism as usize {
            workers.spawn(run_worker(ctx.clone(), id));
        }

        let mut first_error: Option<CrawlError> = None;
        let mut panic = None;
        let mut progress = tokio::time::interval(PROGRESS_INTERVAL);
        progress.tick().await;

        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        tracing::error!("Worker failed: {}", e);
                        ctx.stop.cancel();
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    Some(Err(join_error)) => {
                        ctx.stop.cancel();
                        if join_error.is_panic() {
                            tracing::error!("Worker panicked");
                            if panic.is_none() {
                                panic = Some(join_error.into_panic());
                            }
                        } else if first_error.is_none() {
                            first_error = Some(CrawlError::Worker(join_error.to_string()));
                        }
                    }
                },
                _ = progress.tick() => {
                    log_progress(&ctx, &queue).await;
                }
            }
        }

        if let Some(guard) = guard {
            guard.close();
        }
        state.send_replace(RunState::Stopped);
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }

        let summary = CrawlSummary {
            requests: ctx.stats.requests.load(Ordering::SeqCst),
            responses: ctx.stats.responses.load(Ordering::SeqCst),
            errors: ctx.stats.errors.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
            cancelled: cancel.is_cancelled() && !ctx.drained(),
        };

        if let Some(e) = first_error {
            tracing::error!("Crawl aborted after {:?}: {}", summary.elapsed, e);
            return Err(e);
        }

        tracing::info!(
            "Crawl {}: {} requests ({} ok, {} errors) in {:?}",
            if summary.cancelled { "cancelled" } else { "completed" },
            summary.requests,
            summary.responses,
            summary.errors,
            summary.elapsed
        );
        Ok(summary)
    }
}

/// Logs the run counters and the queue depth
///
/// Returns the queue depth, or `None` when the store could not report it.
async fn log_progress(ctx: &WorkerContext, queue: &FrontierQueue) -> Option<u64> {
    let queued = match queue.len().await {
        Ok(queued) => queued,
        Err(e) => {
            tracing::warn!("Could not read queue depth: {}", e);
            return None;
        }
    };

    tracing::info!(
        "Progress: {} requests, {} responses, {} errors, {} queued",
        ctx.stats.requests.load(Ordering::Relaxed),
        ctx.stats.responses.load(Ordering::Relaxed),
        ctx.stats.errors.load(Ordering::Relaxed),
        queued
    );
    Some(queued)
}

/// Builder for [`Spider`]
pub struct SpiderBuilder {
    config: Config,
    handler: Option<Arc<dyn Handler>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    storage: Option<Arc<dyn Storage>>,
}

impl SpiderBuilder {
    pub fn handler<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Replaces the HTTP fetcher
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Uses an already-open store instead of `config.store`
    ///
    /// The run takes over closing it.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn build(self) -> Spider {
        let (state, _) = watch::channel(RunState::Idle);
        Spider {
            config: self.config,
            handler: self.handler.unwrap_or_else(|| Arc::new(NoopHandler)),
            fetcher: self.fetcher,
            storage: self.storage,
            cancel: CancellationToken::new(),
            state: Arc::new(state),
        }
    }
}
