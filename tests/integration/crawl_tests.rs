//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and SQLite files to
//! hold the frontier, and drive full runs end-to-end through `Spider`.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use swarm_crawl::config::{Config, LimitConfig, StoreBackend};
use swarm_crawl::crawler::{FetchError, Fetcher, Handler, Request, Response, RunState, Spider};
use swarm_crawl::storage::{SqliteStorage, Storage, StorageError, StorageResult};
use swarm_crawl::{CrawlError, QueueHandle};
use tokio::sync::{watch, Notify};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a SQLite-backed test configuration with the given seeds
fn create_test_config(db_path: &Path, seeds: Vec<String>) -> Config {
    let mut config = Config::default();
    config.crawler.parallelism = 4;
    config.crawler.idle_poll_ms = 10;
    config.store.backend = StoreBackend::Sqlite;
    config.store.path = db_path.display().to_string();
    config.seed.urls = seeds;
    config
}

/// Records callbacks and pushes configured links from matching pages
#[derive(Default)]
struct Recorder {
    links: HashMap<String, Vec<String>>,
    responses: Mutex<Vec<String>>,
    errors: Mutex<Vec<(String, Option<u16>, bool)>>,
    pushed: Mutex<Vec<bool>>,
}

impl Recorder {
    fn with_links(links: Vec<(&str, Vec<String>)>) -> Self {
        Self {
            links: links
                .into_iter()
                .map(|(page, urls)| (page.to_string(), urls))
                .collect(),
            ..Self::default()
        }
    }

    fn response_paths(&self) -> Vec<String> {
        let mut paths = self.responses.lock().unwrap().clone();
        paths.sort();
        paths
    }
}

#[async_trait]
impl Handler for Recorder {
    async fn on_response(&self, response: &Response, queue: &QueueHandle) -> Result<(), CrawlError> {
        let page = response.url.path().to_string();
        self.responses.lock().unwrap().push(page.clone());

        if let Some(urls) = self.links.get(&page) {
            for url in urls {
                let queued = queue.push(url).await?;
                self.pushed.lock().unwrap().push(queued);
            }
        }
        Ok(())
    }

    async fn on_error(
        &self,
        request: &Request,
        response: Option<&Response>,
        error: &FetchError,
        _queue: &QueueHandle,
    ) -> Result<(), CrawlError> {
        self.errors.lock().unwrap().push((
            request.url.path().to_string(),
            error.status().map(|s| s.as_u16()),
            response.is_some(),
        ));
        Ok(())
    }
}

/// Wraps a SQLite store, counts `close` calls and can be told to fail
struct CountingStore {
    inner: SqliteStorage,
    closes: AtomicUsize,
    pops: AtomicUsize,
    pushes: AtomicUsize,
    fail_pops_after: Option<usize>,
    fail_pushes_after: Option<usize>,
    state: Mutex<Option<watch::Receiver<RunState>>>,
    state_at_close: Mutex<Option<RunState>>,
}

impl CountingStore {
    fn new(namespace: &str) -> Self {
        Self {
            inner: SqliteStorage::open_in_memory(namespace).unwrap(),
            closes: AtomicUsize::new(0),
            pops: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            fail_pops_after: None,
            fail_pushes_after: None,
            state: Mutex::new(None),
            state_at_close: Mutex::new(None),
        }
    }

    /// Every pop after the first `n` fails
    fn failing_pops_after(mut self, n: usize) -> Self {
        self.fail_pops_after = Some(n);
        self
    }

    /// Every push after the first `n` fails
    fn failing_pushes_after(mut self, n: usize) -> Self {
        self.fail_pushes_after = Some(n);
        self
    }

    /// Records the run state seen at `close`
    fn observe(&self, state: watch::Receiver<RunState>) {
        *self.state.lock().unwrap() = Some(state);
    }
}

fn exhausted(counter: &AtomicUsize, limit: Option<usize>) -> bool {
    let calls = counter.fetch_add(1, Ordering::SeqCst);
    limit.is_some_and(|limit| calls >= limit)
}

#[async_trait]
impl Storage for CountingStore {
    async fn mark_if_new(&self, fingerprint: &str) -> StorageResult<bool> {
        self.inner.mark_if_new(fingerprint).await
    }
    async fn is_seen(&self, fingerprint: &str) -> StorageResult<bool> {
        self.inner.is_seen(fingerprint).await
    }
    async fn seen_count(&self) -> StorageResult<u64> {
        self.inner.seen_count().await
    }
    async fn push_if_new(&self, fingerprint: &str, payload: &str) -> StorageResult<bool> {
        if exhausted(&self.pushes, self.fail_pushes_after) {
            return Err(StorageError::Closed);
        }
        self.inner.push_if_new(fingerprint, payload).await
    }
    async fn pop(&self) -> StorageResult<Option<String>> {
        if exhausted(&self.pops, self.fail_pops_after) {
            return Err(StorageError::Closed);
        }
        self.inner.pop().await
    }
    async fn requeue(&self, payload: &str) -> StorageResult<()> {
        self.inner.requeue(payload).await
    }
    async fn len(&self) -> StorageResult<u64> {
        self.inner.len().await
    }
    async fn clear(&self) -> StorageResult<()> {
        self.inner.clear().await
    }
    fn close(&self) -> StorageResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(state) = self.state.lock().unwrap().as_ref() {
            *self.state_at_close.lock().unwrap() = Some(*state.borrow());
        }
        self.inner.close()
    }
}

fn ok_response(request: &Request) -> Response {
    Response {
        request: request.clone(),
        url: request.url.clone(),
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        body: Vec::new(),
    }
}

/// Records fetch start/end times and the peak number of concurrent fetches
#[derive(Default)]
struct TimingFetcher {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    spans: Mutex<Vec<(Instant, Instant)>>,
}

#[async_trait]
impl Fetcher for TimingFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let start = Instant::now();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(20)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.spans.lock().unwrap().push((start, Instant::now()));
        Ok(ok_response(request))
    }
}

#[tokio::test]
async fn test_pushed_urls_are_crawled_until_quiescent() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    for page in ["/", "/a", "/b"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&dir.path().join("f.db"), vec![format!("{}/", base_url)]);
    let recorder = Arc::new(Recorder::with_links(vec![(
        "/",
        vec![format!("{}/a", base_url), format!("{}/b", base_url)],
    )]));

    let spider = Spider::builder(config)
        .shared_handler(recorder.clone())
        .build();
    let state = spider.subscribe_state();

    let summary = spider.run().await.unwrap();

    assert_eq!(summary.requests, 3);
    assert_eq!(summary.responses, 3);
    assert_eq!(summary.errors, 0);
    assert!(!summary.cancelled);
    assert_eq!(recorder.response_paths(), vec!["/", "/a", "/b"]);
    assert_eq!(*state.borrow(), RunState::Stopped);
}

#[tokio::test]
async fn test_failed_fetch_is_isolated() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/fail"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(
        &dir.path().join("f.db"),
        vec![
            format!("{}/ok1", base_url),
            format!("{}/fail", base_url),
            format!("{}/ok2", base_url),
        ],
    );
    let recorder = Arc::new(Recorder::default());

    let spider = Spider::builder(config)
        .shared_handler(recorder.clone())
        .build();
    let state = spider.subscribe_state();
    let summary = spider.run().await.unwrap();

    assert_eq!(summary.responses, 2);
    assert_eq!(summary.errors, 1);
    assert_eq!(recorder.response_paths(), vec!["/ok1", "/ok2"]);
    assert_eq!(
        *recorder.errors.lock().unwrap(),
        vec![("/fail".to_string(), Some(500), true)]
    );
    assert_eq!(*state.borrow(), RunState::Stopped);
}

#[tokio::test]
async fn test_each_url_fetched_once_despite_repeated_pushes() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    for page in ["/", "/a"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&dir.path().join("f.db"), vec![format!("{}/", base_url)]);
    let recorder = Arc::new(Recorder::with_links(vec![
        (
            "/",
            vec![
                format!("{}/", base_url),
                format!("{}/a", base_url),
                format!("{}/a#section", base_url),
            ],
        ),
        ("/a", vec![format!("{}/", base_url)]),
    ]));

    let spider = Spider::builder(config)
        .shared_handler(recorder.clone())
        .build();
    let summary = spider.run().await.unwrap();

    assert_eq!(summary.requests, 2);
    assert_eq!(
        recorder.pushed.lock().unwrap().iter().filter(|q| **q).count(),
        1
    );
}

#[tokio::test]
async fn test_seen_urls_persist_across_runs() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("f.db");

    let first = Spider::new(
        create_test_config(&db_path, vec![format!("{}/", base_url)]),
        Recorder::default(),
    );
    assert_eq!(first.run().await.unwrap().requests, 1);

    let second = Spider::new(
        create_test_config(&db_path, vec![format!("{}/", base_url)]),
        Recorder::default(),
    );
    assert_eq!(second.run().await.unwrap().requests, 0);
}

#[tokio::test]
async fn test_redirect_target_is_marked_seen() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", format!("{}/new", base_url)),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&dir.path().join("f.db"), vec![format!("{}/old", base_url)]);
    let recorder = Arc::new(Recorder::with_links(vec![(
        "/new",
        vec![format!("{}/new", base_url)],
    )]));

    let spider = Spider::builder(config)
        .shared_handler(recorder.clone())
        .build();
    let summary = spider.run().await.unwrap();

    assert_eq!(summary.responses, 1);
    assert_eq!(*recorder.pushed.lock().unwrap(), vec![false]);
}

#[tokio::test]
async fn test_limit_rule_bounds_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let seeds = (0..12)
        .map(|i| format!("https://www.example.com/{}", i))
        .collect();
    let mut config = create_test_config(&dir.path().join("f.db"), seeds);
    config.crawler.parallelism = 8;
    config.limits = vec![LimitConfig {
        domain_glob: "*.example.com".to_string(),
        parallelism: 2,
        delay_ms: 0,
        random_delay_ms: 0,
    }];

    let fetcher = Arc::new(TimingFetcher::default());
    let spider = Spider::builder(config).fetcher(fetcher.clone()).build();
    let summary = spider.run().await.unwrap();

    assert_eq!(summary.responses, 12);
    let peak = fetcher.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak concurrency was {}", peak);
}

#[tokio::test]
async fn test_limit_rule_delay_between_fetches() {
    let dir = tempfile::tempdir().unwrap();
    let seeds = (0..4)
        .map(|i| format!("https://example.com/{}", i))
        .collect();
    let mut config = create_test_config(&dir.path().join("f.db"), seeds);
    config.crawler.domain = "example.com".to_string();
    config.crawler.parallelism = 1;
    config.crawler.delay_ms = 50;

    let fetcher = Arc::new(TimingFetcher::default());
    let spider = Spider::builder(config).fetcher(fetcher.clone()).build();
    spider.run().await.unwrap();

    let mut spans = fetcher.spans.lock().unwrap().clone();
    spans.sort_by_key(|(start, _)| *start);
    assert_eq!(spans.len(), 4);
    for pair in spans.windows(2) {
        let (_, previous_end) = pair[0];
        let (next_start, _) = pair[1];
        assert!(next_start.duration_since(previous_end) >= Duration::from_millis(50));
    }
}

#[tokio::test]
async fn test_store_closed_once_after_run() {
    let store = Arc::new(CountingStore::new("closing"));
    let mut config = Config::default();
    config.crawler.idle_poll_ms = 10;
    config.seed.urls = vec!["https://example.com/".to_string()];

    let spider = Spider::builder(config)
        .fetcher(Arc::new(TimingFetcher::default()))
        .storage(store.clone())
        .build();
    spider.run().await.unwrap();

    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_store_closed_once_on_startup_abort() {
    let store = Arc::new(CountingStore::new("closing"));
    let mut config = Config::default();
    config.limits = vec![LimitConfig {
        domain_glob: "[oops".to_string(),
        parallelism: 1,
        delay_ms: 0,
        random_delay_ms: 0,
    }];

    let spider = Spider::builder(config).storage(store.clone()).build();
    let state = spider.subscribe_state();
    let result = spider.run().await;

    assert!(matches!(result, Err(CrawlError::Config(_))));
    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    assert_eq!(*state.borrow(), RunState::Stopped);
}

#[tokio::test]
async fn test_stopped_is_published_after_store_release() {
    let store = Arc::new(CountingStore::new("closing"));
    let mut config = Config::default();
    config.crawler.idle_poll_ms = 10;
    config.seed.urls = vec!["https://example.com/".to_string()];

    let spider = Spider::builder(config)
        .fetcher(Arc::new(TimingFetcher::default()))
        .storage(store.clone())
        .build();
    store.observe(spider.subscribe_state());
    let state = spider.subscribe_state();
    spider.run().await.unwrap();

    let at_close = store.state_at_close.lock().unwrap().expect("store closed");
    assert_ne!(at_close, RunState::Stopped);
    assert_eq!(*state.borrow(), RunState::Stopped);
}

#[tokio::test]
async fn test_store_failure_during_crawl_aborts_run() {
    let store = Arc::new(CountingStore::new("flaky").failing_pops_after(3));
    let mut config = Config::default();
    config.crawler.parallelism = 20;
    config.crawler.idle_poll_ms = 10;
    config.seed.urls = (0..10).map(|i| format!("https://example.com/{}", i)).collect();

    let spider = Spider::builder(config)
        .fetcher(Arc::new(TimingFetcher::default()))
        .storage(store.clone())
        .build();
    let state = spider.subscribe_state();
    let result = spider.run().await;

    assert!(matches!(result, Err(CrawlError::Storage(StorageError::Closed))));
    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    assert_eq!(*state.borrow(), RunState::Stopped);
}

#[tokio::test]
async fn test_failed_push_from_callback_aborts_run() {
    // The seed push succeeds, the push from `on_response` does not
    let store = Arc::new(CountingStore::new("flaky").failing_pushes_after(1));
    let mut config = Config::default();
    config.crawler.idle_poll_ms = 10;
    config.seed.urls = vec!["https://example.com/".to_string()];
    let recorder = Arc::new(Recorder::with_links(vec![(
        "/",
        vec!["https://example.com/next".to_string()],
    )]));

    let spider = Spider::builder(config)
        .shared_handler(recorder.clone())
        .fetcher(Arc::new(TimingFetcher::default()))
        .storage(store.clone())
        .build();
    let result = spider.run().await;

    assert!(matches!(result, Err(CrawlError::Storage(StorageError::Closed))));
    assert_eq!(recorder.response_paths(), vec!["/"]);
    assert!(recorder.pushed.lock().unwrap().is_empty());
    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
}

/// Fails the run from `on_response`
struct FailingHandler;

#[async_trait]
impl Handler for FailingHandler {
    async fn on_response(&self, _response: &Response, _queue: &QueueHandle) -> Result<(), CrawlError> {
        Err(CrawlError::Callback("refusing page".to_string()))
    }
}

#[tokio::test]
async fn test_callback_error_aborts_run() {
    let store = Arc::new(CountingStore::new("fatal"));
    let mut config = Config::default();
    config.crawler.idle_poll_ms = 10;
    config.seed.urls = vec!["https://example.com/".to_string()];

    let spider = Spider::builder(config)
        .handler(FailingHandler)
        .fetcher(Arc::new(TimingFetcher::default()))
        .storage(store.clone())
        .build();
    let result = spider.run().await;

    assert!(matches!(result, Err(CrawlError::Callback(_))));
    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
}

/// Panics from `on_response`
struct PanickingHandler;

#[async_trait]
impl Handler for PanickingHandler {
    async fn on_response(&self, _response: &Response, _queue: &QueueHandle) -> Result<(), CrawlError> {
        panic!("handler bug");
    }
}

#[tokio::test]
async fn test_callback_panic_propagates_after_release() {
    let store = Arc::new(CountingStore::new("panic"));
    let mut config = Config::default();
    config.crawler.idle_poll_ms = 10;
    config.seed.urls = vec!["https://example.com/".to_string()];

    let spider = Spider::builder(config)
        .handler(PanickingHandler)
        .fetcher(Arc::new(TimingFetcher::default()))
        .storage(store.clone())
        .build();
    let joined = tokio::spawn(spider.run()).await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
}

/// Signals when a fetch starts, then never finishes
#[derive(Default)]
struct StallingFetcher {
    started: Notify,
}

#[async_trait]
impl Fetcher for StallingFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ok_response(request))
    }
}

#[tokio::test]
async fn test_cancel_requeues_in_flight_job() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("f.db");
    let mut config = create_test_config(&db_path, vec!["https://example.com/".to_string()]);
    config.crawler.parallelism = 1;

    let fetcher = Arc::new(StallingFetcher::default());
    let spider = Spider::builder(config).fetcher(fetcher.clone()).build();
    let cancel = spider.cancellation_token();
    let run = tokio::spawn(spider.run());

    fetcher.started.notified().await;
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.responses, 0);

    let reopened = SqliteStorage::open(&db_path, "swarm_crawl").unwrap();
    assert_eq!(reopened.len().await.unwrap(), 1);
}
