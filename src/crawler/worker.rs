//! Worker loop and termination detection
//!
//! Each worker repeatedly pops a job, runs it through admission, the request
//! hook, the fetch and the response/error hook, then releases its admission.
//! A worker counts as busy from just before its pop until its job is fully
//! handled, so URLs pushed from a callback always land before the worker
//! stops counting. The crawl is quiescent once no worker is busy, no pop
//! happened in between, and the store reports an empty queue. The check is
//! run by whichever worker leaves the busy set empty, so an idle worker only
//! needs waking for new work.

use crate::crawler::coordinator::RunState;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::handler::{Handler, Request, Response};
use crate::crawler::limiter::RateLimiter;
use crate::frontier::{FrontierQueue, Job, QueueHandle};
use crate::storage::StorageResult;
use crate::url::{extract_domain, normalize_url};
use crate::CrawlError;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const DEBUG_TARGET: &str = "swarm_crawl::debug";

/// Counters shared by all workers of a run
#[derive(Debug, Default)]
pub(crate) struct CrawlStats {
    pub requests: AtomicU64,
    pub responses: AtomicU64,
    pub errors: AtomicU64,
}

/// State shared by all workers of one run
pub(crate) struct WorkerContext {
    pub queue: Arc<FrontierQueue>,
    pub handle: QueueHandle,
    pub handler: Arc<dyn Handler>,
    pub fetcher: Arc<dyn Fetcher>,
    pub limiter: RateLimiter,
    /// Cancelled on drain, on the first fatal error, or by the caller
    pub stop: CancellationToken,
    pub state: Arc<watch::Sender<RunState>>,
    pub stats: CrawlStats,
    pub idle_poll: Duration,
    pub debug: bool,
    busy: AtomicUsize,
    pops: AtomicU64,
    drained: AtomicBool,
}

impl WorkerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<FrontierQueue>,
        handler: Arc<dyn Handler>,
        fetcher: Arc<dyn Fetcher>,
        limiter: RateLimiter,
        stop: CancellationToken,
        state: Arc<watch::Sender<RunState>>,
        idle_poll: Duration,
        debug: bool,
    ) -> Self {
        Self {
            handle: QueueHandle::new(queue.clone()),
            queue,
            handler,
            fetcher,
            limiter,
            stop,
            state,
            stats: CrawlStats::default(),
            idle_poll,
            debug,
            busy: AtomicUsize::new(0),
            pops: AtomicU64::new(0),
            drained: AtomicBool::new(false),
        }
    }

    /// Whether the run ended because the frontier drained
    pub fn drained(&self) -> bool {
        self.drained.load(Ordering::SeqCst)
    }

    fn enter_busy(&self) {
        self.busy.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of workers still busy
    fn leave_busy(&self) -> usize {
        self.busy.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Confirms that nothing is queued and nothing can still be pushed
    ///
    /// The pop counter brackets the check: a pop that completes anywhere in
    /// the window changes it, and a pop still in progress keeps its worker
    /// busy at one of the two busy reads.
    async fn is_quiescent(&self) -> StorageResult<bool> {
        let pops_before = self.pops.load(Ordering::SeqCst);
        if self.busy.load(Ordering::SeqCst) != 0 {
            return Ok(false);
        }

        let empty = self.queue.is_empty().await?;

        let busy_after = self.busy.load(Ordering::SeqCst);
        let pops_after = self.pops.load(Ordering::SeqCst);
        Ok(empty && busy_after == 0 && pops_before == pops_after)
    }

    fn drain(&self) {
        if !self.drained.swap(true, Ordering::SeqCst) {
            tracing::info!("Frontier drained, stopping workers");
            self.state.send_replace(RunState::Draining);
        }
        self.stop.cancel();
    }
}

/// Runs one worker until the run stops
pub(crate) async fn run_worker(ctx: Arc<WorkerContext>, id: usize) -> Result<(), CrawlError> {
    tracing::debug!("Worker {} started", id);

    while !ctx.stop.is_cancelled() {
        ctx.enter_busy();

        let job = match ctx.queue.pop().await {
            Ok(job) => job,
            Err(e) => {
                ctx.leave_busy();
                return Err(e.into());
            }
        };

        match job {
            Some(job) => {
                ctx.pops.fetch_add(1, Ordering::SeqCst);
                let result = process(&ctx, job).await;
                ctx.leave_busy();
                result?;
            }
            None => {
                // Registered before leaving busy so no push is missed
                let pushed = ctx.queue.pushed().notified();

                if ctx.leave_busy() == 0 && ctx.is_quiescent().await? {
                    ctx.drain();
                    break;
                }

                tokio::select! {
                    _ = pushed => {}
                    _ = tokio::time::sleep(ctx.idle_poll) => {}
                    _ = ctx.stop.cancelled() => break,
                }
            }
        }
    }

    tracing::debug!("Worker {} stopped", id);
    Ok(())
}

/// Handles one popped job
///
/// Fetch failures are routed to `on_error`; only store failures and
/// callback errors are returned. A job interrupted by cancellation before
/// its fetch completes goes back to the head of the queue.
async fn process(ctx: &WorkerContext, job: Job) -> Result<(), CrawlError> {
    let mut request = match Request::from_job(&job) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Dropping job for {}: {}", job.url, e);
            return Ok(());
        }
    };

    let host = extract_domain(&request.url).unwrap_or_default();

    let admission = tokio::select! {
        biased;
        _ = ctx.stop.cancelled() => {
            requeue(ctx, &job).await?;
            return Ok(());
        }
        admission = ctx.limiter.admit(&host) => admission,
    };

    ctx.handler.on_request(&mut request).await;
    ctx.stats.requests.fetch_add(1, Ordering::Relaxed);
    if ctx.debug {
        tracing::info!(target: DEBUG_TARGET, "request {} {}", request.method, request.url);
    }

    let fetched = tokio::select! {
        biased;
        _ = ctx.stop.cancelled() => {
            drop(admission);
            requeue(ctx, &job).await?;
            return Ok(());
        }
        fetched = ctx.fetcher.fetch(&request) => fetched,
    };

    let outcome = match fetched {
        Ok(response) => {
            ctx.stats.responses.fetch_add(1, Ordering::Relaxed);
            if ctx.debug {
                tracing::info!(
                    target: DEBUG_TARGET,
                    "response {} {} ({} bytes)",
                    response.status,
                    response.url,
                    response.body.len()
                );
            }
            mark_final_url(ctx, &response).await?;
            ctx.handler.on_response(&response, &ctx.handle).await
        }
        Err(error) => {
            ctx.stats.errors.fetch_add(1, Ordering::Relaxed);
            if ctx.debug {
                tracing::info!(target: DEBUG_TARGET, "error {}: {}", request.url, error);
            } else {
                tracing::debug!("Fetch failed: {}", error);
            }
            if let Some(response) = error.response() {
                mark_final_url(ctx, response).await?;
            }
            ctx.handler
                .on_error(&request, error.response(), &error, &ctx.handle)
                .await
        }
    };

    // Fatal: free the slot without waiting out the delay
    outcome?;

    tokio::select! {
        _ = admission.release() => {}
        _ = ctx.stop.cancelled() => {}
    }
    Ok(())
}

/// Records a redirect target as seen so it is not crawled again
async fn mark_final_url(ctx: &WorkerContext, response: &Response) -> Result<(), CrawlError> {
    if !response.was_redirected() {
        return Ok(());
    }
    if let Ok(final_url) = normalize_url(response.url.as_str()) {
        ctx.queue.dedup().mark_url_if_new(&final_url).await?;
    }
    Ok(())
}

async fn requeue(ctx: &WorkerContext, job: &Job) -> Result<(), CrawlError> {
    tracing::debug!("Requeueing interrupted job {}", job.url);
    ctx.queue.requeue(job).await?;
    Ok(())
}
