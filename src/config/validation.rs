use crate::config::types::{Config, CrawlerConfig, LimitConfig, SeedConfig, StoreBackend, StoreConfig};
use crate::url::DomainGlob;
use crate::ConfigError;
use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

const MAX_PARALLELISM: u32 = 1000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_limits(&config.limits)?;
    validate_store_config(&config.store)?;
    validate_seeds(&config.seed)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_parallelism("crawler.parallelism", config.parallelism)?;
    DomainGlob::parse(&config.domain)?;

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.idle_poll_ms == 0 {
        return Err(ConfigError::Validation(
            "idle-poll-ms must be >= 1ms".to_string(),
        ));
    }

    for (name, value) in &config.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid header name '{}'",
                name
            )));
        }
        if HeaderValue::from_str(value).is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid value for header '{}'",
                name
            )));
        }
    }

    Ok(())
}

/// Validates explicit limit rules
fn validate_limits(limits: &[LimitConfig]) -> Result<(), ConfigError> {
    for limit in limits {
        DomainGlob::parse(&limit.domain_glob)?;
        validate_parallelism(
            &format!("limit '{}' parallelism", limit.domain_glob),
            limit.parallelism,
        )?;
    }
    Ok(())
}

fn validate_parallelism(name: &str, value: u32) -> Result<(), ConfigError> {
    if value < 1 || value > MAX_PARALLELISM {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_PARALLELISM, value
        )));
    }
    Ok(())
}

/// Validates store connection settings
fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.prefix.is_empty() {
        return Err(ConfigError::Validation(
            "store prefix cannot be empty".to_string(),
        ));
    }

    match config.backend {
        StoreBackend::Redis => {
            if config.address.is_empty() {
                return Err(ConfigError::Validation(
                    "redis address cannot be empty".to_string(),
                ));
            }
            if config.db < 0 {
                return Err(ConfigError::Validation(format!(
                    "redis db must be >= 0, got {}",
                    config.db
                )));
            }
        }
        StoreBackend::Sqlite => {
            if config.path.is_empty() {
                return Err(ConfigError::Validation(
                    "sqlite path cannot be empty".to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Validates seed URLs
///
/// Blank entries are allowed here and skipped when the frontier is seeded.
fn validate_seeds(seeds: &SeedConfig) -> Result<(), ConfigError> {
    for seed in seeds.urls.iter().filter(|s| !s.trim().is_empty()) {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }

    Ok(())
}
