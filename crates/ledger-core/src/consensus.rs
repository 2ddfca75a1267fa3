//! Longest-chain conflict resolution against known peers.
//!
//! Fork choice is by block count only. A candidate must be strictly longer
//! than the best seen so far and pass full validation at the local
//! difficulty. The ledger lock is held only to snapshot state and to commit;
//! all peer I/O happens without it.

use crate::chain::{validate_chain, validate_headers};
use crate::constants::{BLOCKS_PER_BATCH, PEER_TIMEOUT_MS};
use crate::error::LedgerResult;
use crate::ledger::LedgerHandle;
use crate::store::ChainStore;
use crate::{Block, HeaderRecord};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How the resolver talks to other nodes.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Cheap probe of a peer's chain length.
    async fn chain_length(&self, peer: &str) -> Result<u64>;

    /// The peer's full chain, oldest first, fetched `page_size` blocks at a time.
    async fn fetch_chain(&self, peer: &str, page_size: u32) -> Result<Vec<Block>>;

    /// The peer's header sequence, oldest first.
    async fn fetch_headers(&self, peer: &str, page_size: u32) -> Result<Vec<HeaderRecord>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Download and validate the full chain of any longer peer.
    #[default]
    FullChain,
    /// Validate the peer's headers before downloading transaction bodies.
    HeadersFirst,
}

impl FromStr for SyncStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" | "full-chain" => Ok(Self::FullChain),
            "headers" | "headers-first" => Ok(Self::HeadersFirst),
            other => bail!("unknown sync strategy `{other}`"),
        }
    }
}

/// Candidates are always validated at the difficulty of the ledger being resolved.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    pub page_size: u32,
    /// Bound on each peer request.
    pub peer_timeout: Duration,
    pub strategy: SyncStrategy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            page_size: BLOCKS_PER_BATCH,
            peer_timeout: Duration::from_millis(PEER_TIMEOUT_MS),
            strategy: SyncStrategy::default(),
        }
    }
}

#[derive(Debug)]
pub struct Resolver<T> {
    transport: T,
    config: ResolverConfig,
}

impl<T: PeerTransport> Resolver<T> {
    pub fn new(transport: T, config: ResolverConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Scan every known peer (except ourselves) and adopt the longest valid
    /// chain if it beats the local one. Returns whether the chain was replaced.
    /// Unreachable or misbehaving peers are logged and skipped.
    pub async fn resolve<S: ChainStore>(&self, ledger: &LedgerHandle<S>) -> LedgerResult<bool> {
        let (peers, local_length, difficulty) = {
            let ledger = ledger.lock().await;
            let own = ledger.config().self_address.clone();
            let peers: Vec<String> = ledger
                .peers()
                .filter(|p| Some(*p) != own.as_ref())
                .cloned()
                .collect();
            (peers, ledger.len(), ledger.config().difficulty)
        };

        let mut max_length = local_length;
        let mut best: Option<(String, Vec<Block>)> = None;
        for peer in peers {
            match self.candidate_from(&peer, max_length, difficulty).await {
                Ok(Some(chain)) => {
                    max_length = chain.len() as u64;
                    debug!(peer, length = max_length, "new best candidate chain");
                    best = Some((peer, chain));
                }
                Ok(None) => {}
                Err(err) => warn!(peer, "skipping peer: {err:#}"),
            }
        }

        let Some((origin, chain)) = best else {
            debug!(length = local_length, "local chain is authoritative");
            return Ok(false);
        };

        let mut ledger = ledger.lock().await;
        if chain.len() as u64 <= ledger.len() {
            // The local chain grew past the candidate while peers were polled.
            info!(origin, "candidate chain no longer longer than local chain");
            return Ok(false);
        }
        let length = chain.len();
        ledger.replace_chain(chain)?;
        info!(origin, length, "adopted longer chain from peer");
        Ok(true)
    }

    /// Returns the peer's chain when it is longer than `max_length` and valid.
    async fn candidate_from(
        &self,
        peer: &str,
        max_length: u64,
        difficulty: u32,
    ) -> Result<Option<Vec<Block>>> {
        let length = self
            .bounded(self.config.peer_timeout, self.transport.chain_length(peer))
            .await
            .context("length probe failed")?;
        debug!(peer, length, max_length, "probed peer");
        if length <= max_length {
            return Ok(None);
        }

        // A download is one request per page.
        let pages = length.div_ceil(u64::from(self.config.page_size.max(1))).max(1);
        let download_timeout = self
            .config
            .peer_timeout
            .saturating_mul(u32::try_from(pages).unwrap_or(u32::MAX));

        if self.config.strategy == SyncStrategy::HeadersFirst {
            let headers = self
                .bounded(
                    download_timeout,
                    self.transport.fetch_headers(peer, self.config.page_size),
                )
                .await
                .context("header download failed")?;
            // The peer may have grown since its length was read.
            if headers.len() as u64 <= max_length {
                bail!(
                    "peer advertised {length} blocks but served {} headers",
                    headers.len()
                );
            }
            validate_headers(&headers, difficulty).context("invalid headers")?;
        }

        let chain = self
            .bounded(
                download_timeout,
                self.transport.fetch_chain(peer, self.config.page_size),
            )
            .await
            .context("chain download failed")?;
        if chain.len() as u64 <= max_length {
            bail!("peer served {} blocks, not longer than {max_length}", chain.len());
        }
        validate_chain(&chain, difficulty).context("invalid chain")?;
        Ok(Some(chain))
    }

    async fn bounded<R>(
        &self,
        limit: Duration,
        request: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        tokio::time::timeout(limit, request)
            .await
            .map_err(|_| anyhow!("timed out after {limit:?}"))?
    }
}
