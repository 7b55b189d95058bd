//! Request/response types and the callback pipeline
//!
//! User code plugs into a crawl by implementing [`Handler`]. Every method has
//! a no-op default, so a handler only overrides the hooks it needs.

use crate::crawler::fetcher::FetchError;
use crate::frontier::{Job, QueueHandle};
use crate::CrawlError;
use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue,
};
use reqwest::{Method, StatusCode};
use std::fmt;
use thiserror::Error;
use url::Url;

/// A stored job that cannot be turned into a [`Request`]
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid method {method:?}")]
    InvalidMethod { method: String },

    #[error("Invalid header name {name:?}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: InvalidHeaderName,
    },

    #[error("Invalid value for header {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: InvalidHeaderValue,
    },
}

/// An outgoing request, built from a popped [`Job`]
///
/// `on_request` receives it mutably before the fetch.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
}

impl Request {
    /// Converts a job into a request
    ///
    /// Fails on a URL, method or header that does not parse, which can only
    /// come from a payload written by something other than this crate.
    pub fn from_job(job: &Job) -> Result<Self, RequestError> {
        let url = Url::parse(&job.url).map_err(|source| RequestError::InvalidUrl {
            url: job.url.clone(),
            source,
        })?;
        let method = Method::from_bytes(job.method.as_bytes()).map_err(|_| {
            RequestError::InvalidMethod {
                method: job.method.clone(),
            }
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &job.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|source| {
                RequestError::InvalidHeaderName {
                    name: name.clone(),
                    source,
                }
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|source| {
                RequestError::InvalidHeaderValue {
                    name: name.clone(),
                    source,
                }
            })?;
            headers.insert(header_name, header_value);
        }

        Ok(Self {
            url,
            method,
            headers,
        })
    }
}

/// A completed fetch
#[derive(Clone)]
pub struct Response {
    /// The request as sent, after `on_request`
    pub request: Request,
    /// Final URL after redirects
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    /// The body decoded as UTF-8, with invalid sequences replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn was_redirected(&self) -> bool {
        self.url != self.request.url
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("url", &self.url.as_str())
            .field("status", &self.status)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Hooks invoked by the workers for every job
///
/// Handlers are shared by all workers and called concurrently. They receive
/// only their explicit arguments; discovered URLs go back into the frontier
/// through the [`QueueHandle`]. An `Err` returned from `on_response` or
/// `on_error` is fatal to the whole run.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Called right before the fetch; may rewrite method and headers
    async fn on_request(&self, _request: &mut Request) {}

    /// Called after a successful (2xx) fetch
    async fn on_response(
        &self,
        _response: &Response,
        _queue: &QueueHandle,
    ) -> Result<(), CrawlError> {
        Ok(())
    }

    /// Called after a failed fetch
    ///
    /// `response` is present when the server answered with a non-success
    /// status.
    async fn on_error(
        &self,
        _request: &Request,
        _response: Option<&Response>,
        _error: &FetchError,
        _queue: &QueueHandle,
    ) -> Result<(), CrawlError> {
        Ok(())
    }
}

/// A handler that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl Handler for NoopHandler {}
