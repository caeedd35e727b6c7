mod config;
mod identity;

use std::net::AddrParseError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use hive_core::{AddressError, Guid, NodeAddress};
use hive_node::{
    FilePublisherStore, NeighbourMap, NodeBuilder, PublisherSweeper, Publishers, Router,
    StoreError,
};
use hive_transport::{Server, SocketCache, TcpTransmitter, TransportError};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::identity::{resolve_node_id, IdentityError};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node (default)
    Run,
    /// Print the effective configuration as TOML
    PrintConfig,
    /// Print a guid: the hash of TEXT, or a random one
    Guid { text: Option<String> },
}

#[derive(Debug, Error)]
enum DaemonError {
    #[error("failed to load config: {0}")]
    Config(#[from] ::config::ConfigError),
    #[error("invalid bind address: {0}")]
    Bind(#[from] AddrParseError),
    #[error("invalid seed: {0}")]
    Seed(#[from] AddressError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("publisher store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

fn main() {
    let filter = std::env::var("HIVE_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Some(Commands::Guid { text }) => {
            let guid = text.map_or_else(Guid::random, Guid::from_content);
            println!("{}", guid.to_hex());
            Ok(())
        }
        Some(Commands::PrintConfig) => print_config(cli.config),
        Some(Commands::Run) | None => run(cli.config),
    };

    if let Err(err) = outcome {
        error!("{err}");
        std::process::exit(1);
    }
}

fn print_config(path: Option<PathBuf>) -> Result<(), DaemonError> {
    let config = DaemonConfig::new(path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Flag raised by SIGTERM or SIGINT.
fn shutdown_flag() -> Result<Arc<AtomicBool>, DaemonError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;
    Ok(shutdown)
}

fn run(path: Option<PathBuf>) -> Result<(), DaemonError> {
    let shutdown = shutdown_flag()?;
    let config = DaemonConfig::new(path)?;
    let node_id = resolve_node_id(config.node_id.as_deref(), &config.spool_dir)?;
    let address = NodeAddress::new(node_id, config.advertise_host.clone(), config.port);

    let router = Arc::new(NeighbourMap::new(address.clone()));
    for seed in config.seed_addresses()? {
        if router.add(seed.clone()) {
            info!(%seed, "added seed neighbour");
        }
    }

    let publishers = Arc::new(Publishers::new(FilePublisherStore::open(&config.spool_dir)?));
    let transmitter = Arc::new(TcpTransmitter::new(
        Arc::new(SocketCache::new(config.socket_cache_config())),
        config.transmitter_config(),
    ));
    let node = Arc::new(
        NodeBuilder::new(address.clone(), transmitter.clone())
            .config(config.node_config())
            .router(router.clone())
            .publishers(Arc::clone(&publishers))
            .build(),
    );

    let mut server = Server::bind(config.server_config()?, node.clone())?;
    let mut sweeper = PublisherSweeper::start(publishers, config.publisher_sweep_interval)?;
    info!(%address, bind = %server.local_addr(), "hive node running");


    let mut last_status = Instant::now();
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(SHUTDOWN_POLL);
        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            let stats = node.stats();
            info!(
                received = stats.received,
                forwarded = stats.forwarded,
                dispatched = stats.dispatched,
                evicted = stats.neighbours_evicted,
                neighbours = router.neighbours().len(),
                connections = server.stats().active,
                idle_sockets = transmitter.cache().stats().idle,
                "node status"
            );
            if stats.ttl_exceeded > 0 {
                warn!(ttl_exceeded = stats.ttl_exceeded, "messages dropped at hop bound");
            }
        }
    }

    info!("shutting down");
    server.shutdown();
    sweeper.stop();
    transmitter.cache().dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use signal_hook::consts::SIGTERM;
    use signal_hook::low_level::raise;

    use super::shutdown_flag;

    #[test]
    fn termination_signal_raises_shutdown_flag() {
        let shutdown = shutdown_flag().expect("signal handlers should register");
        assert!(!shutdown.load(Ordering::Relaxed));
        raise(SIGTERM).expect("signal should be delivered");
        assert!(shutdown.load(Ordering::Relaxed));
    }
}
