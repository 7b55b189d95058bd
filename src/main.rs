//! Swarm-Crawl main entry point
//!
//! This is the command-line interface for the Swarm-Crawl crawl engine.

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use swarm_crawl::config::{load_config_with_hash, Config, StoreBackend};
use swarm_crawl::crawler::{FetchError, Handler, LimitRule, Request, Response, Spider};
use swarm_crawl::storage::{open_storage, StoreGuard};
use swarm_crawl::{CrawlError, QueueHandle};
use tracing_subscriber::EnvFilter;

/// Swarm-Crawl: a persistent-frontier web crawler
///
/// Swarm-Crawl fetches every URL in a deduplicated frontier kept in Redis or
/// SQLite, honoring per-domain concurrency limits and delays, and stops once
/// the frontier is drained.
#[derive(Parser, Debug)]
#[command(name = "swarm-crawl")]
#[command(version)]
#[command(about = "A persistent-frontier web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Clear the frontier and seen set of this namespace before crawling
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    fresh: bool,

    /// Validate config and print the effective rules without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Print queue depth and seen count from the store and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config).await
    } else {
        handle_crawl(config, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("swarm_crawl=info,warn"),
            1 => EnvFilter::new("swarm_crawl=debug,info"),
            2 => EnvFilter::new("swarm_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Swarm-Crawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", config.crawler.parallelism);
    println!("  User agent: {}", config.crawler.user_agent);
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);
    println!("  Max body size: {} bytes", config.crawler.max_body_size);
    println!("  Debug events: {}", config.crawler.debug);
    for (name, value) in &config.crawler.headers {
        println!("  Header: {}: {}", name, value);
    }

    let rules = LimitRule::from_config(config)?;
    println!("\nLimit Rules ({}):", rules.len());
    for rule in &rules {
        println!(
            "  - {}: parallelism {}, delay {:?} (+ up to {:?})",
            rule.glob(),
            rule.parallelism(),
            rule.delay(),
            rule.random_delay()
        );
    }

    println!("\nStore:");
    match config.store.backend {
        StoreBackend::Redis => println!(
            "  Redis {} db {} (prefix {})",
            config.store.address, config.store.db, config.store.prefix
        ),
        StoreBackend::Sqlite => println!(
            "  SQLite {} (namespace {})",
            config.store.path, config.store.prefix
        ),
    }

    println!("\nSeeds ({}):", config.seed.urls.len());
    for seed in &config.seed.urls {
        println!("  * {}", seed);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows frontier statistics from the store
async fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(&config.store)
        .await
        .context("failed to open store")?;
    let _guard = StoreGuard::new(storage.clone());

    println!("Namespace: {}\n", config.store.prefix);
    println!("Queued jobs: {}", storage.len().await?);
    println!("Seen URLs: {}", storage.seen_count().await?);
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, fresh: bool) -> anyhow::Result<()> {
    let mut builder = Spider::builder(config.clone()).handler(LoggingHandler);

    if fresh {
        tracing::info!("Clearing namespace {}", config.store.prefix);
        let storage = open_storage(&config.store)
            .await
            .context("failed to open store")?;
        if let Err(e) = storage.clear().await {
            StoreGuard::new(storage).close();
            return Err(e).context("failed to clear namespace");
        }
        // The spider takes over closing the store
        builder = builder.storage(storage);
    }

    let spider = builder.build();

    let cancel = spider.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping crawl");
            cancel.cancel();
        }
    });

    let summary = spider.run().await.context("crawl failed")?;
    println!(
        "Crawl {}: {} requests, {} responses, {} errors in {:.1}s",
        if summary.cancelled { "interrupted" } else { "complete" },
        summary.requests,
        summary.responses,
        summary.errors,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

/// Logs each response and failure
struct LoggingHandler;

#[async_trait]
impl Handler for LoggingHandler {
    async fn on_response(&self, response: &Response, _queue: &QueueHandle) -> Result<(), CrawlError> {
        tracing::info!(
            "{} {} ({} bytes)",
            response.status.as_u16(),
            response.url,
            response.body.len()
        );
        Ok(())
    }

    async fn on_error(
        &self,
        request: &Request,
        _response: Option<&Response>,
        error: &FetchError,
        _queue: &QueueHandle,
    ) -> Result<(), CrawlError> {
        tracing::warn!("{} failed: {}", request.url, error);
        Ok(())
    }
}
