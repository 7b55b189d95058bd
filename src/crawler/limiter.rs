//! Domain-glob rate limiting
//!
//! This module handles:
//! - Compiling limit rules from `[crawler]` and `[[limit]]`
//! - Bounding concurrent fetches per rule with a semaphore
//! - Applying the post-request delay (plus jitter) before a slot is reused

use crate::config::Config;
use crate::url::DomainGlob;
use crate::ConfigError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A compiled limit rule
///
/// The concurrency cap and the delay apply to the whole class of hosts the
/// glob matches, not to each host separately.
#[derive(Debug)]
pub struct LimitRule {
    glob: DomainGlob,
    parallelism: usize,
    delay: Duration,
    random_delay: Duration,
    slots: Arc<Semaphore>,
}

impl LimitRule {
    /// Creates a rule
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidPattern` for a bad glob and
    /// `ConfigError::Validation` for zero parallelism.
    pub fn new(
        domain_glob: &str,
        parallelism: u32,
        delay: Duration,
        random_delay: Duration,
    ) -> Result<Self, ConfigError> {
        let glob = DomainGlob::parse(domain_glob)?;
        if parallelism == 0 {
            return Err(ConfigError::Validation(format!(
                "limit '{}' parallelism must be at least 1",
                domain_glob
            )));
        }

        let parallelism = parallelism as usize;
        Ok(Self {
            glob,
            parallelism,
            delay,
            random_delay,
            slots: Arc::new(Semaphore::new(parallelism)),
        })
    }

    /// Builds the effective rule set for a configuration
    ///
    /// Explicit `[[limit]]` entries replace the default rule derived from
    /// `crawler.domain`, `crawler.parallelism` and `crawler.delay-ms`.
    pub fn from_config(config: &Config) -> Result<Vec<Self>, ConfigError> {
        if config.limits.is_empty() {
            let crawler = &config.crawler;
            return Ok(vec![Self::new(
                &crawler.domain,
                crawler.parallelism,
                crawler.delay(),
                Duration::from_millis(crawler.random_delay_ms),
            )?]);
        }

        config
            .limits
            .iter()
            .map(|limit| {
                Self::new(
                    &limit.domain_glob,
                    limit.parallelism,
                    Duration::from_millis(limit.delay_ms),
                    Duration::from_millis(limit.random_delay_ms),
                )
            })
            .collect()
    }

    pub fn glob(&self) -> &str {
        self.glob.as_str()
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn random_delay(&self) -> Duration {
        self.random_delay
    }

    pub fn matches(&self, host: &str) -> bool {
        self.glob.matches(host)
    }
}

/// Admission control over an ordered list of rules
///
/// The first rule whose glob matches a host governs it. Hosts matching no
/// rule are admitted immediately.
#[derive(Debug, Default)]
pub struct RateLimiter {
    rules: Vec<LimitRule>,
}

impl RateLimiter {
    pub fn new(rules: Vec<LimitRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(LimitRule::from_config(config)?))
    }

    pub fn rules(&self) -> &[LimitRule] {
        &self.rules
    }

    /// Waits for a free slot of the rule governing `host`
    pub async fn admit(&self, host: &str) -> Admission {
        let Some(rule) = self.rules.iter().find(|r| r.matches(host)) else {
            return Admission::unrestricted();
        };

        // The semaphore is owned by the rule and never closed
        let permit = rule.slots.clone().acquire_owned().await.ok();

        Admission {
            permit,
            delay: rule.delay,
            random_delay: rule.random_delay,
        }
    }
}

/// A held slot of a limit rule
///
/// Dropping it frees the slot immediately; [`Admission::release`] applies the
/// rule's delay first.
#[derive(Debug)]
pub struct Admission {
    permit: Option<OwnedSemaphorePermit>,
    delay: Duration,
    random_delay: Duration,
}

impl Admission {
    fn unrestricted() -> Self {
        Self {
            permit: None,
            delay: Duration::ZERO,
            random_delay: Duration::ZERO,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.permit.is_some()
    }

    /// The pause to apply before the slot is reused: the rule's delay plus
    /// a uniform random extra in `0..=random_delay`
    pub fn pause(&self) -> Duration {
        let max_jitter = self.random_delay.as_millis() as u64;
        let jitter = if max_jitter > 0 {
            rand::rng().random_range(0..=max_jitter)
        } else {
            0
        };
        self.delay + Duration::from_millis(jitter)
    }

    /// Sleeps for [`Admission::pause`] while holding the slot, then frees it
    pub async fn release(self) {
        let pause = self.pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        drop(self.permit);
    }
}
