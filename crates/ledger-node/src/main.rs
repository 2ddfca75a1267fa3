mod api;
mod constants;
mod transport;
#[cfg(test)]
mod testing;

use anyhow::Context;
use api::AppState;
use clap::Parser;
use constants::{DEFAULT_DATA_DIR, DEFAULT_LISTEN, DEFAULT_LOG_FILTER};
use ledger_core::constants::{
    BLOCKS_PER_BATCH, MAX_BLOCKS_PER_REQUEST, MINING_REWARD, PEER_TIMEOUT_MS, POW_TARGET_DIFFICULTY,
};
use ledger_core::consensus::{Resolver, ResolverConfig, SyncStrategy};
use ledger_core::ledger::{Ledger, LedgerConfig, LedgerHandle};
use ledger_core::mine::MiningWorker;
use ledger_core::store::ChainStore;
use ledger_storage::SledStore;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transport::HttpPeerTransport;

#[derive(Parser, Debug)]
#[command(version, about = "Proof-of-work ledger node")]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:5000
    #[arg(long, env = "LEDGER_LISTEN", default_value = DEFAULT_LISTEN)]
    listen: SocketAddr,

    /// Data directory for sled
    #[arg(long, env = "LEDGER_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Required leading zero hex digits of every block hash
    #[arg(long, env = "LEDGER_DIFFICULTY", default_value_t = POW_TARGET_DIFFICULTY)]
    difficulty: u32,

    #[arg(long, env = "LEDGER_MINING_REWARD", default_value_t = MINING_REWARD)]
    mining_reward: f64,

    /// Per-request peer timeout in milliseconds
    #[arg(long, env = "LEDGER_PEER_TIMEOUT_MS", default_value_t = PEER_TIMEOUT_MS)]
    peer_timeout_ms: u64,

    /// Blocks per page when downloading a peer's chain
    #[arg(
        long,
        env = "LEDGER_PAGE_SIZE",
        default_value_t = BLOCKS_PER_BATCH,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_BLOCKS_PER_REQUEST))
    )]
    page_size: u32,

    /// Peer sync strategy: `full` or `headers-first`
    #[arg(long, env = "LEDGER_SYNC", default_value = "full")]
    sync: SyncStrategy,

    /// Peers to register at startup (`host:port`, comma separated)
    #[arg(long = "peer", env = "LEDGER_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Address other nodes reach us at; defaults to the listen address
    #[arg(long, env = "LEDGER_ADVERTISE")]
    advertise: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let store = Arc::new(SledStore::open(&args.data_dir)?);
    let ledger = Ledger::open(
        Arc::clone(&store),
        LedgerConfig {
            difficulty: args.difficulty,
            mining_reward: args.mining_reward,
            self_address: Some(args.advertise.clone().unwrap_or_else(|| args.listen.to_string())),
        },
    )
    .context("opening ledger")?;
    info!(height = ledger.len(), difficulty = args.difficulty, "ledger ready");

    let worker = MiningWorker::spawn().context("starting mining worker")?;
    let ledger = LedgerHandle::new(ledger, worker);
    for peer in args.peers.iter().filter(|p| !p.trim().is_empty()) {
        if let Err(err) = ledger.register_node(peer).await {
            warn!(peer, "ignoring configured peer: {err}");
        }
    }

    let peer_timeout = Duration::from_millis(args.peer_timeout_ms);
    let resolver = Resolver::new(
        HttpPeerTransport::new(peer_timeout)?,
        ResolverConfig {
            page_size: args.page_size,
            peer_timeout,
            strategy: args.sync,
        },
    );
    let state = AppState {
        ledger,
        resolver: Arc::new(resolver),
    };
    let app = api::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!("ledger-node listening on http://{}", args.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.flush()?;
    info!("ledger-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
