//! HTTP fetcher implementation
//!
//! This module handles the network side of a job:
//! - Building the HTTP client with the configured user agent and timeouts
//! - Sending the request as mutated by `on_request`
//! - Reading the body up to the configured size limit
//! - Classifying failures into [`FetchError`]

use crate::config::CrawlerConfig;
use crate::crawler::handler::{Request, Response};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Why a fetch did not produce a successful response
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    Status {
        url: String,
        status: StatusCode,
        response: Box<Response>,
    },
}

impl FetchError {
    /// The server's response, for status failures
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Status { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn classify(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                source: error,
            }
        }
    }
}

/// Performs the network fetch for a request
///
/// The crawl engine only depends on this trait; [`HttpFetcher`] is the
/// production implementation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// Builds an HTTP client with the crawler's settings
///
/// Redirects are followed (up to reqwest's default of 10 hops); `debug`
/// turns on reqwest's connection-level tracing.
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(10))
        .connection_verbose(config.debug)
        .gzip(true)
        .brotli(true)
        .build()
}

/// `reqwest`-backed fetcher
pub struct HttpFetcher {
    client: Client,
    max_body_size: usize,
}

impl HttpFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(build_http_client(config)?, config.max_body_size))
    }

    /// Wraps an existing client; `max_body_size == 0` means unlimited
    pub fn with_client(client: Client, max_body_size: usize) -> Self {
        Self {
            client,
            max_body_size,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request.url.as_str();

        let mut response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| FetchError::classify(url, e))?;

        let status = response.status();
        let final_url = response.url().clone();
        let headers = response.headers().clone();

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::classify(url, e))?
        {
            body.extend_from_slice(&chunk);
            if self.max_body_size > 0 && body.len() >= self.max_body_size {
                body.truncate(self.max_body_size);
                tracing::debug!("Truncated body of {} at {} bytes", url, self.max_body_size);
                break;
            }
        }

        let response = Response {
            request: request.clone(),
            url: final_url,
            status,
            headers,
            body,
        };

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
                response: Box::new(response),
            });
        }

        Ok(response)
    }
}
