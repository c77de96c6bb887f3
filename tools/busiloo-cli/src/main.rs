//! Command-line host for the Busiloo offline worker.
//!
//! Runs the worker against a live origin and keeps its cache partitions in a
//! JSON store between runs, so a later `fetch` sees what an earlier `install`
//! or `fetch` cached.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the shell and prune partitions from older versions
//! busiloo-sw --origin http://localhost:8000/ install
//!
//! # Answer one request the way the worker would
//! busiloo-sw fetch /api/find_route_results?from=3&to=9
//! busiloo-sw fetch / --navigate
//!
//! # Show what is cached
//! busiloo-sw caches
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use busiloo_common::{init_logging, LogFormat};
use busiloo_net::{HttpNetwork, Request, Url};
use busiloo_sw::{Cache, CacheStorage, MemoryCacheStorage, ServiceWorker};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use http::Method;
use tracing::info;

mod config;

use config::{default_store_path, AppConfig};

#[derive(Parser)]
#[command(name = "busiloo-sw")]
#[command(about = "Offline cache worker for the Busiloo bus-route app")]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Origin the worker serves (overrides the config file)
    #[arg(long, global = true)]
    origin: Option<Url>,

    /// Cache store file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache the shell, then activate (prune stale partitions)
    Install {
        /// Stop after precaching
        #[arg(long)]
        no_activate: bool,
    },

    /// Dispatch one request through the worker and print the response
    Fetch {
        /// Absolute URL or path relative to the origin
        target: String,
        /// Treat as a top-level page navigation
        #[arg(long)]
        navigate: bool,
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
        /// Only print status and headers
        #[arg(short = 'I', long)]
        head: bool,
    },

    /// List cache partitions and their entries
    Caches,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut app = AppConfig::load(cli.config.as_deref())?;
    if let Some(origin) = cli.origin {
        app.worker = app.worker.with_origin(origin);
    }
    app.worker.validate()?;

    let mut log_config = app.logging.clone().with_verbosity(cli.verbose);
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    init_logging(&log_config)?;

    let store = cli.store.unwrap_or_else(default_store_path);
    let caches = Arc::new(
        MemoryCacheStorage::load(&store)
            .await
            .with_context(|| format!("loading cache store {}", store.display()))?,
    );

    match cli.command {
        Commands::Install { no_activate } => {
            let network = Arc::new(HttpNetwork::new(app.loader.clone())?);
            let (worker, _events) = ServiceWorker::new(app.worker.clone(), caches.clone(), network);

            let count = worker.install().await?;
            println!("Precached {count} shell assets into {}", app.worker.partitions.shell);

            if !no_activate {
                let report = worker.activate().await?;
                if report.deleted.is_empty() {
                    println!("No stale partitions");
                }
                for name in &report.deleted {
                    println!("Deleted stale partition {name}");
                }
            }
        }

        Commands::Fetch {
            target,
            navigate,
            method,
            data,
            head,
        } => {
            let network = Arc::new(HttpNetwork::new(app.loader.clone())?);
            let (worker, _events) = ServiceWorker::new(app.worker.clone(), caches.clone(), network);

            let request = build_request(&worker, &target, navigate, &method, data)?;
            let strategy = worker.dispatcher().strategy_for(&request);
            info!(url = %request.url, %strategy, "Dispatching");

            let response = worker.dispatcher().handle_fetch(&request).await?;

            println!("{} ({:?}, {strategy})", response.status, response.source);
            for (name, value) in response.headers.iter() {
                println!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
            }
            if !head {
                println!();
                println!("{}", String::from_utf8_lossy(&response.body));
            }
        }

        Commands::Caches => {
            let names = caches.keys().await?;
            if names.is_empty() {
                println!("No cache partitions in {}", store.display());
            }
            for name in names {
                let marker = if app.worker.partitions.is_current(&name) {
                    ""
                } else {
                    " (stale)"
                };
                let cache = caches.open(&name).await?;
                let keys = cache.keys().await?;
                println!("{name}{marker}: {} entries", keys.len());
                for key in keys {
                    println!("  {key}");
                }
            }
            return Ok(());
        }
    }

    caches
        .save(&store)
        .await
        .with_context(|| format!("saving cache store {}", store.display()))?;
    Ok(())
}

fn build_request(
    worker: &ServiceWorker,
    target: &str,
    navigate: bool,
    method: &str,
    data: Option<String>,
) -> anyhow::Result<Request> {
    let url = worker.config().resolve(target)?;
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("invalid method {method:?}"))?;

    if navigate && method != Method::GET {
        bail!("navigations are always GET");
    }

    let mut request = if navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
    };
    request.method = method;
    request.body = data.map(Bytes::from);
    Ok(request)
}
