//! pixiv-cache maintenance CLI
//!
//! Operator commands over the cache service: inspect and seed the tiered
//! cache, fetch artwork pages, and reset the local caches.
//!
//! ```text
//! pixiv-cache --redis-addr 127.0.0.1:6379 get ranking:daily
//! pixiv-cache fetch 123 https://i.pximg.net/img-original/img/.../123_p0.jpg
//! pixiv-cache clear-local
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pixiv_cache::{CacheService, CacheStore, ServiceConfig};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tiered cache and image downloader for the Pixiv bot
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Redis address; omit to keep the remote tier in process memory
    #[arg(long, env = "REDIS_ADDR")]
    redis_addr: Option<String>,

    /// Maximum pooled Redis connections
    #[arg(long, env = "REDIS_POOL_SIZE", default_value = "16")]
    redis_pool_size: usize,

    /// Remote key namespace
    #[arg(long, env = "CACHE_NAMESPACE", default_value = "pixiv")]
    namespace: String,

    /// Hot-tier lifetime of promoted entries in seconds
    #[arg(long, env = "LOCAL_TTL_SECONDS", default_value = "5400")]
    local_ttl_seconds: u64,

    /// Upper bound of the random lifetime offset in seconds
    #[arg(long, env = "LOCAL_TTL_JITTER_SECONDS", default_value = "1800")]
    local_ttl_jitter_seconds: u64,

    /// Directory for downloaded images
    #[arg(long, env = "IMAGE_CACHE_DIR", default_value = "data/image/cgj")]
    image_cache_dir: PathBuf,

    /// Longest to wait on an in-flight download in seconds (0 waits forever)
    #[arg(long, env = "FETCH_TIMEOUT_SECONDS", default_value = "0")]
    fetch_timeout_seconds: u64,

    /// Always download again instead of reusing files already on disk
    #[arg(long, env = "NO_REUSE_EXISTING")]
    no_reuse_existing: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a value through the tiered cache
    Get { key: String },

    /// Write a JSON value to both tiers
    Put {
        key: String,
        /// JSON text
        value: String,
        /// Lifetime in seconds (0 never expires)
        #[arg(long, default_value = "0")]
        ttl_seconds: u64,
    },

    /// Check whether either tier holds a key
    Exists { key: String },

    /// List keys known to either tier
    Keys,

    /// Remove a key from both tiers
    Remove { key: String },

    /// Drop the hot tier, location index, checksums and image files
    ClearLocal,

    /// Download one artwork page into the image directory
    Fetch { illust_id: u64, url: String },
}

impl Args {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            redis_address: self.redis_addr.clone(),
            redis_pool_size: self.redis_pool_size,
            namespace: self.namespace.clone(),
            local_ttl: Duration::from_secs(self.local_ttl_seconds),
            local_ttl_jitter: Duration::from_secs(self.local_ttl_jitter_seconds),
            cache_dir: self.image_cache_dir.clone(),
            fetch_timeout: (self.fetch_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.fetch_timeout_seconds)),
            reuse_existing_files: !self.no_reuse_existing,
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let service =
        CacheService::new(args.service_config()).context("failed to build cache service")?;
    service
        .ping()
        .await
        .context("remote cache tier is unreachable")?;
    info!("Connected: {:?}", service);

    let cache = service.cache();
    match args.command {
        Command::Get { key } => match cache.get(&key).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("(absent)"),
        },
        Command::Put {
            key,
            value,
            ttl_seconds,
        } => {
            let value: serde_json::Value =
                serde_json::from_str(&value).context("value is not valid JSON")?;
            cache
                .put_for(&key, value, Duration::from_secs(ttl_seconds))
                .await?;
            println!("stored {}", key);
        }
        Command::Exists { key } => println!("{}", cache.exists(&key).await?),
        Command::Keys => {
            let mut keys: Vec<String> = cache.keys().await?.into_iter().collect();
            keys.sort();
            for key in keys {
                println!("{}", key);
            }
        }
        Command::Remove { key } => println!("{}", cache.remove(&key).await?),
        Command::ClearLocal => {
            let report = service.clear_local().await?;
            println!(
                "cleared {} indexed locations, {} checksums, {} files",
                report.indexed_locations, report.checksums, report.files
            );
        }
        Command::Fetch { illust_id, url } => {
            let fetched = service
                .fetch_illust(illust_id, &url)
                .await
                .with_context(|| format!("failed to fetch {}", url))?;
            println!(
                "{} {} sha256={} bytes={}{}",
                fetched.resource_key,
                fetched.path.display(),
                fetched.checksum.digest,
                fetched.checksum.byte_length,
                if fetched.reused { " (reused)" } else { "" }
            );
        }
    }

    info!("Cache metrics: {:?}", cache.metrics());
    Ok(())
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

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "deadpool=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr so command output stays clean on stdout.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_existing_defaults_on() {
        let args = Args::try_parse_from(["pixiv-cache", "keys"]).unwrap();
        assert!(args.service_config().reuse_existing_files);
    }

    #[test]
    fn test_no_reuse_existing_flag() {
        let args =
            Args::try_parse_from(["pixiv-cache", "--no-reuse-existing", "fetch", "1", "u"]).unwrap();
        let config = args.service_config();
        assert!(!config.reuse_existing_files);
        assert_matches::assert_matches!(args.command, Command::Fetch { illust_id: 1, .. });
    }
}
