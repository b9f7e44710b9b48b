//! Ephemera CLI
//!
//! Operates the two-tier storage against a distributed backend.
//!
//! ```text
//! ephemera --backend redis --redis-url redis://cache:6379 set entry::42 '"hello"' --ttl-secs 300
//! ephemera --backend redis get entry::42
//! ephemera --backend redis probe
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use ephemera::storage::{
    DataStorage, DistributedBackend, InMemoryBackend, LocalConfig, StorageConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Process-local in-memory backend
    Memory,
    /// Redis-compatible server
    Redis,
}

/// Ephemera - two-tier expiring key/value storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Distributed backend
    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value = "redis")]
    backend: Backend,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Deadline for each distributed call in milliseconds
    #[arg(long, env = "OPERATION_TIMEOUT_MS", default_value = "5000")]
    operation_timeout_ms: u64,

    /// Maximum entries in the local tier
    #[arg(long, env = "LOCAL_MAX_ENTRIES", default_value = "10000")]
    local_max_entries: usize,

    /// Upper bound for local TTLs in seconds (0 = no cap)
    #[arg(long, env = "LOCAL_TTL_CAP_SECS", default_value = "300")]
    local_ttl_cap_secs: u64,

    /// Fill the local tier after distributed hits
    #[arg(long, env = "POPULATE_LOCAL_ON_READ")]
    populate_local_on_read: bool,

    /// Namespace prepended to keys built by the storage
    #[arg(long, env = "KEY_PREFIX")]
    key_prefix: Option<String>,

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
    /// Read a JSON value
    Get { key: String },
    /// Store a JSON value
    Set {
        key: String,
        /// JSON-encoded value
        value: String,
        #[arg(long, default_value = "300")]
        ttl_secs: u64,
    },
    /// Remove a key from both tiers
    Remove { key: String },
    /// Increment a counter and print the new value
    Incr { key: String },
    /// List the members of a set
    Members { key: String },
    /// Print the remaining TTL of a key
    Ttl { key: String },
    /// Run a write/read/remove round trip against the backend
    Probe,
}

impl Args {
    fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            local: LocalConfig {
                max_entries: self.local_max_entries,
                ttl_cap: (self.local_ttl_cap_secs > 0)
                    .then(|| Duration::from_secs(self.local_ttl_cap_secs)),
            },
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            populate_local_on_read: self.populate_local_on_read,
            key_prefix: self.key_prefix.clone().filter(|p| !p.is_empty()),
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

    let backend = connect(&args).await?;
    info!(backend = backend.name(), "Storage backend ready");
    let storage = DataStorage::with_config(args.storage_config(), backend);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    if let Err(e) = run(&storage, args.command, &cancel).await {
        error!("Command failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn connect(args: &Args) -> anyhow::Result<Arc<dyn DistributedBackend>> {
    match args.backend {
        Backend::Memory => Ok(Arc::new(InMemoryBackend::new())),
        #[cfg(feature = "redis")]
        Backend::Redis => {
            use ephemera::storage::{RedisBackend, RedisConfig};

            let config = RedisConfig {
                url: args.redis_url.clone(),
            };
            let backend = RedisBackend::connect(&config)
                .await
                .with_context(|| format!("connecting to {}", args.redis_url))?;
            backend.ping().await.context("Redis PING failed")?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "redis"))]
        Backend::Redis => bail!("built without the `redis` feature"),
    }
}

async fn run(
    storage: &DataStorage,
    command: Command,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Command::Get { key } => {
            match storage.get::<serde_json::Value>(&key, cancel).await? {
                Some(value) => println!("{}", value),
                None => println!("(absent)"),
            }
        }
        Command::Set {
            key,
            value,
            ttl_secs,
        } => {
            let value: serde_json::Value =
                serde_json::from_str(&value).context("value must be valid JSON")?;
            storage
                .set(&key, value, Duration::from_secs(ttl_secs), cancel)
                .await?;
            println!("OK");
        }
        Command::Remove { key } => {
            storage.remove(&key, cancel).await?;
            println!("OK");
        }
        Command::Incr { key } => {
            println!("{}", storage.increment_and_get(&key, cancel).await?);
        }
        Command::Members { key } => {
            let members: HashSet<String> = storage.get_set(&key, cancel).await?;
            let mut members: Vec<_> = members.into_iter().collect();
            members.sort();
            for member in members {
                println!("{}", member);
            }
        }
        Command::Ttl { key } => match storage.time_to_live(&key, cancel).await? {
            Some(ttl) => println!("{}ms", ttl.as_millis()),
            None => println!("(absent or persistent)"),
        },
        Command::Probe => probe(storage, cancel).await?,
    }
    Ok(())
}

async fn probe(storage: &DataStorage, cancel: &CancellationToken) -> anyhow::Result<()> {
    let key = format!("probe::{}", Uuid::new_v4());
    let value = format!("probe-{}", Uuid::new_v4());

    storage
        .set(&key, value.clone(), Duration::from_secs(30), cancel)
        .await?;
    // Read from the distributed tier to bypass the local copy
    let read: Option<String> = storage.distributed().get(&key).await?;
    if read.as_deref() != Some(value.as_str()) {
        bail!("probe read back {:?}, expected {:?}", read, value);
    }

    let counter = format!("{}::count", key);
    let count = storage.increment_and_get(&counter, cancel).await?;
    if count != 1 {
        bail!("probe counter started at {}, expected 1", count);
    }

    storage.remove(&key, cancel).await?;
    storage.remove(&counter, cancel).await?;
    if storage.contains(&key, cancel).await? {
        bail!("probe key still present after remove");
    }

    let metrics = storage.metrics();
    info!(
        write_latency = ?metrics.write_latency,
        read_latency = ?metrics.read_latency,
        "Probe succeeded"
    );
    println!("OK");
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
    if let Ok(directive) = "redis=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
