//! Crawler module for the crawl engine
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching behind the `Fetcher` trait
//! - The `Handler` callback pipeline
//! - Domain-glob admission control and delays
//! - The worker pool and run coordination

mod coordinator;
mod fetcher;
mod handler;
mod limiter;
mod worker;

pub use coordinator::{CrawlSummary, RunState, Spider, SpiderBuilder};
pub use fetcher::{build_http_client, FetchError, Fetcher, HttpFetcher};
pub use handler::{Handler, NoopHandler, Request, RequestError, Response};
pub use limiter::{Admission, LimitRule, RateLimiter};
