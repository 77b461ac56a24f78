//! Precache sync tool for RustKit service workers.
//!
//! Populates an on-disk precache store from a manifest the way a worker's
//! install step would, and inspects what ended up in it.
//!
//! ## Usage
//!
//! ```bash
//! # Install a manifest and drop stale entries
//! precache-sync install --manifest precache-manifest.json --store .cache/sw \
//!     --location https://example.com/sw.js --activate
//!
//! # List caches and their keys
//! precache-sync list --store .cache/sw
//!
//! # Look up a URL the way the precache route would, using the
//! # config's `precache_route` options (directory index, clean URLs,
//! # ignored query parameters)
//! precache-sync match https://example.com/index.html --manifest precache-manifest.json \
//!     --store .cache/sw --location https://example.com/sw.js
//! ```

use clap::{Args, Parser, Subcommand};
use rustkit_common::{init_logging, LogConfig, LogFormat};
use rustkit_net::http::header::CONTENT_TYPE;
use rustkit_net::{LoaderConfig, ResourceLoader};
use rustkit_sw::{
    Cache, CacheStorage, DiskCacheStorage, ExtendableEvent, ServiceWorkerEvent, ServiceWorkerScope,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

mod manifest;

use manifest::{load_config, load_manifest, SyncError, SyncReport};

#[derive(Parser)]
#[command(name = "precache-sync")]
#[command(about = "Install and inspect RustKit service worker precaches")]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "pretty", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that builds a worker scope.
#[derive(Args)]
struct WorkerArgs {
    /// Precache manifest (JSON entry list)
    #[arg(short, long)]
    manifest: PathBuf,
    /// Cache storage directory
    #[arg(short, long)]
    store: PathBuf,
    /// Worker config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Worker script URL
    #[arg(short, long)]
    location: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new and changed manifest entries into the store
    Install {
        #[command(flatten)]
        worker: WorkerArgs,
        /// Also remove entries no longer in the manifest
        #[arg(long)]
        activate: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove entries no longer in the manifest
    Activate {
        #[command(flatten)]
        worker: WorkerArgs,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List caches and their stored requests
    List {
        /// Cache storage directory
        #[arg(short, long)]
        store: PathBuf,
    },

    /// Look up a URL and its variations in the precache
    Match {
        /// URL to look up
        url: String,
        #[command(flatten)]
        worker: WorkerArgs,
        /// Print the response body
        #[arg(long)]
        body: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let format: LogFormat = cli.log_format.parse()?;
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(format))?;

    match cli.command {
        Commands::Install {
            worker,
            activate,
            json,
        } => install(&worker, activate, json).await?,
        Commands::Activate { worker, json } => {
            let (sw, _rx) = open_scope(&worker).await?;
            let controller = sw.precache_controller();
            let result = controller.activate().await?;
            SyncReport::new(controller.cache_name())
                .with_cleanup(result)
                .print(json)?;
        }
        Commands::List { store } => list(store).await?,
        Commands::Match { url, worker, body } => {
            let (sw, _rx) = open_scope(&worker).await?;
            match sw.match_precache_route(&url).await? {
                Some(response) => {
                    let content_type = response
                        .headers
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    let bytes = response.bytes();
                    println!("{} {}", response.status.as_u16(), url);
                    println!("  Content-Type: {}", content_type);
                    println!("  Size: {} bytes", bytes.len());
                    if body {
                        println!();
                        println!("{}", String::from_utf8_lossy(&bytes));
                    }
                }
                None => {
                    println!("Not precached: {}", url);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Build a worker scope over the on-disk store with the manifest loaded.
async fn open_scope(
    args: &WorkerArgs,
) -> Result<
    (
        ServiceWorkerScope,
        tokio::sync::mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    ),
    SyncError,
> {
    let config = load_config(args.config.as_deref(), args.location.as_deref())?;
    let entries = load_manifest(&args.manifest)?;
    debug!(entries = entries.len(), manifest = %args.manifest.display(), "Loaded manifest");

    let storage = Arc::new(DiskCacheStorage::new(&args.store).await?);
    let loader = Arc::new(ResourceLoader::new(LoaderConfig::default())?);
    let (sw, rx) = ServiceWorkerScope::new(&config, storage, loader)?;
    sw.precache(entries)?;
    Ok((sw, rx))
}

async fn install(args: &WorkerArgs, activate: bool, json: bool) -> Result<(), SyncError> {
    let (sw, mut rx) = open_scope(args).await?;

    let event = ExtendableEvent::install();
    sw.on_install(&event)?;
    event.settle().await?;

    if activate {
        let event = ExtendableEvent::activate();
        sw.on_activate(&event)?;
        event.settle().await?;
    }

    let mut report = SyncReport::new(sw.precache_controller().cache_name());
    while let Ok(event) = rx.try_recv() {
        match event {
            ServiceWorkerEvent::PrecacheInstalled(result) => report = report.with_install(result),
            ServiceWorkerEvent::PrecacheCleanedUp(result) => report = report.with_cleanup(result),
            ServiceWorkerEvent::StateChange { new_state, .. } => {
                debug!(state = ?new_state, "Worker state changed")
            }
        }
    }
    info!(state = ?sw.state(), "Precache sync finished");
    report.print(json)
}

async fn list(store: PathBuf) -> Result<(), SyncError> {
    let storage = DiskCacheStorage::new(store).await?;
    let names = storage.keys().await?;
    if names.is_empty() {
        println!("No caches in {}", storage.root().display());
        return Ok(());
    }

    for name in names {
        let cache = storage.open(&name).await?;
        let keys = cache.keys().await?;
        println!("{} ({} entries)", name, keys.len());
        for request in keys {
            println!("  {}", request.url);
        }
    }
    Ok(())
}
