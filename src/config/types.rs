use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Swarm-Crawl
///
/// Every section has defaults, so an empty TOML document (or
/// `Config::default()`) describes a valid crawl with no seeds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default, rename = "limit")]
    pub limits: Vec<LimitConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Emit per-request lifecycle events
    pub debug: bool,

    /// Host glob the default limit rule applies to
    pub domain: String,

    /// Number of concurrent workers
    pub parallelism: u32,

    /// Delay after each request to a matching host (milliseconds)
    pub delay_ms: u64,

    /// Upper bound of extra random delay added to `delay_ms` (milliseconds)
    pub random_delay_ms: u64,

    /// User-Agent header sent with every request
    pub user_agent: String,

    /// Whole-request timeout (seconds)
    pub request_timeout_secs: u64,

    /// Response bodies are truncated to this many bytes (0 = unlimited)
    pub max_body_size: usize,

    /// How often idle workers re-check the store for work (milliseconds)
    pub idle_poll_ms: u64,

    /// Default headers attached to every job
    pub headers: BTreeMap<String, String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            domain: "*".to_string(),
            parallelism: 20,
            delay_ms: 0,
            random_delay_ms: 0,
            user_agent: format!("swarm-crawl/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
            max_body_size: 10 * 1024 * 1024,
            idle_poll_ms: 100,
            headers: BTreeMap::new(),
        }
    }
}

impl CrawlerConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// An explicit domain limit rule
///
/// When any `[[limit]]` entries are present they replace the default rule
/// derived from `[crawler]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LimitConfig {
    /// Glob over hostnames, e.g. `*.example.*`
    pub domain_glob: String,

    /// Maximum concurrent requests to hosts matching the glob
    pub parallelism: u32,

    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default)]
    pub random_delay_ms: u64,
}

/// Which backing store holds the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Sqlite,
}

/// Backing store connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Redis `host:port`
    pub address: String,

    /// Redis password (empty for none)
    pub password: String,

    /// Redis logical database
    pub db: i64,

    /// Key prefix / namespace shared by every key of this crawl
    pub prefix: String,

    /// SQLite database file
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            address: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
            prefix: "swarm_crawl".to_string(),
            path: "swarm_crawl.db".to_string(),
        }
    }
}

/// Initial URLs pushed into the frontier before the workers start
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub urls: Vec<String>,
}
