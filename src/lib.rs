//! Swarm-Crawl: a persistent-frontier web crawler
//!
//! This crate implements a crawl engine built around a deduplicated URL
//! frontier kept in an external store (Redis or SQLite), a bounded pool of
//! workers, domain-glob rate limiting, and user callbacks that can push newly
//! discovered URLs back into the frontier.

pub mod config;
pub mod crawler;
pub mod frontier;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Swarm-Crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Callback failed: {0}")]
    Callback(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for Swarm-Crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    CrawlSummary, FetchError, Handler, Request, RequestError, Response, RunState, Spider,
    SpiderBuilder,
};
pub use frontier::{FrontierQueue, Job, PushReport, QueueHandle};
pub use crate::url::{fingerprint, glob_match, normalize_url};
