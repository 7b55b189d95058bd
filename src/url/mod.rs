//! URL handling module for Swarm-Crawl
//!
//! This module provides URL normalization and fingerprinting for the frontier,
//! host extraction, and the hostname globs used by limit rules.

mod domain;
mod matcher;
mod normalize;

// Re-export main functions
pub use domain::extract_domain;
pub use matcher::{glob_match, DomainGlob};
pub use normalize::{fingerprint, normalize_url};
