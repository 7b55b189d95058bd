use crate::storage::StorageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// A pending unit of work in the frontier
///
/// `url` is always in normalized form; it is both what gets fetched and what
/// the job's fingerprint is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    pub queued_at: DateTime<Utc>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Job {
    /// Creates a `GET` job for a normalized URL, inheriting default headers
    pub fn new(url: &Url, headers: &BTreeMap<String, String>) -> Self {
        Self {
            url: url.to_string(),
            method: default_method(),
            headers: headers.clone(),
            queued_at: Utc::now(),
        }
    }

    /// Serializes the job for the backing store
    pub fn to_payload(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a job read back from the backing store
    pub fn from_payload(payload: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
