//! slabcached: memcached binary protocol server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use server::banner::{BannerConfig, print_banner};
use server::config::{Config, DEFAULT_CONFIG};
use server::{listener, logging, signal};
use slab_cache::SlabCache;

#[derive(Parser)]
#[command(name = "slabcached")]
#[command(about = "Slab cache server speaking the memcached binary protocol")]
#[command(version)]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print!("{}", DEFAULT_CONFIG);
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    logging::init(&config.logging);

    let shutdown = match signal::install_signal_handler() {
        Ok(flag) => flag,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handler");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config, shutdown) {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

fn run(config: Config, shutdown: Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let slab_config = config.slab_config();
    let listeners: Vec<SocketAddr> = config.listener.iter().map(|l| l.address).collect();

    print_banner(&BannerConfig {
        version: env!("CARGO_PKG_VERSION"),
        workers: config.threads(),
        listeners: &listeners,
        cache: &slab_config,
    });

    let cache = SlabCache::builder().config(slab_config).build()?;
    tracing::info!(
        memory_limit = cache.config().memory_limit(),
        buckets = cache.config().buckets(),
        "cache initialized"
    );

    listener::run(&config, cache, shutdown)
}
