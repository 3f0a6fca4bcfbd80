//! Market Cache CLI
//!
//! Maintenance commands for the persistent cache tier.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_cache::cache::ReadMode;
use market_cache::error::{Error, Result};
use market_cache::{CacheConfig, TieredCache};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Market Cache - tiered cache maintenance for market data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, global = true, env = "MARKET_CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, print TTL policies
    CheckConfig,
    /// Print persistent tier statistics
    Stats {
        #[arg(long, value_enum, default_value_t = StatsFormat::Json)]
        format: StatsFormat,
    },
    /// Remove expired entries
    ClearExpired,
    /// Remove every entry
    Purge,
    /// Print a cached value by `source:subject` key
    Get { key: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatsFormat {
    Json,
    Prometheus,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => CacheConfig::from_file(path)?,
        None => CacheConfig::default(),
    };
    debug!(config = ?args.config, "Configuration loaded");

    match args.command {
        Command::CheckConfig => {
            println!("default ttl: {:?}", config.default_ttl());
            for (source, ttl) in config.resolved_policies() {
                println!("{}: {:?}", source, ttl);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats { format } => {
            let cache = open_cache(config)?;
            match format {
                StatsFormat::Json => {
                    let persistent = cache.persistent().ok_or_else(persistent_disabled)?;
                    println!("{}", to_pretty(&persistent.stats()?)?);
                }
                StatsFormat::Prometheus => {
                    cache.refresh_storage_stats()?;
                    print!("{}", cache.stats().render_prometheus()?);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::ClearExpired => {
            let removed = open_cache(config)?.clear_expired()?;
            info!(removed, "Cleared expired entries");
            println!("{}", removed);
            Ok(ExitCode::SUCCESS)
        }
        Command::Purge => {
            let removed = open_cache(config)?.purge()?;
            info!(removed, "Purged cache");
            println!("{}", removed);
            Ok(ExitCode::SUCCESS)
        }
        Command::Get { key } => {
            let Some((source, subject)) = key.split_once(':') else {
                return Err(Error::Config(format!(
                    "key '{}' must have the form source:subject",
                    key
                )));
            };
            let cache = open_cache(config)?;
            match cache.get(source, subject, ReadMode::Normal)? {
                Some(lookup) => {
                    debug!(tier = %lookup.tier, "Cache hit");
                    println!("{}", to_pretty(&lookup.value)?);
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("{}: not cached", key);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn open_cache(config: CacheConfig) -> Result<TieredCache> {
    TieredCache::from_config(config)
}

fn persistent_disabled() -> Error {
    Error::Config("sqlite tier is disabled".into())
}

fn to_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so command output stays machine-readable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
