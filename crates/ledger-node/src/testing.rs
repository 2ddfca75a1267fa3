use crate::api::{router, AppState};
use crate::transport::HttpPeerTransport;
use ledger_core::consensus::{Resolver, ResolverConfig};
use ledger_core::ledger::{Ledger, LedgerConfig, LedgerHandle};
use ledger_core::mine::MiningWorker;
use ledger_storage::SledStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const DIFFICULTY: u32 = 1;

/// A node served on an ephemeral local port, backed by a throwaway sled db.
pub(crate) struct TestNode {
    pub addr: SocketAddr,
    pub state: AppState,
    _dir: TempDir,
}

impl TestNode {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

pub(crate) async fn spawn_node() -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let ledger = Ledger::open(
        store,
        LedgerConfig {
            difficulty: DIFFICULTY,
            self_address: Some(addr.to_string()),
            ..LedgerConfig::default()
        },
    )
    .unwrap();
    let resolver = Resolver::new(
        HttpPeerTransport::new(Duration::from_secs(2)).unwrap(),
        ResolverConfig {
            page_size: 2,
            peer_timeout: Duration::from_secs(2),
            ..ResolverConfig::default()
        },
    );
    let state = AppState {
        ledger: LedgerHandle::new(ledger, MiningWorker::spawn().unwrap()),
        resolver: Arc::new(resolver),
    };
    let app = router(state.clone());
    tokio::spawn(async move { axum::serve(listener, app).await });
    TestNode { addr, state, _dir: dir }
}
