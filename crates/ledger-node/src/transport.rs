use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ledger_core::consensus::PeerTransport;
use ledger_core::{Block, HeaderRecord};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Talks to other nodes over their HTTP API. Peers are `host:port`.
#[derive(Clone, Debug)]
pub(crate) struct HttpPeerTransport {
    client: Client,
}

#[derive(Deserialize)]
struct LengthResponse {
    length: u64,
}

#[derive(Deserialize)]
struct ChainPage {
    length: u64,
    chain: Vec<Block>,
}

#[derive(Deserialize)]
struct HeaderPage {
    length: u64,
    headers: Vec<HeaderRecord>,
}

/// A page of some peer listing plus the length the peer reported with it.
trait Paged {
    type Item;
    fn into_parts(self) -> (u64, Vec<Self::Item>);
}

impl Paged for ChainPage {
    type Item = Block;
    fn into_parts(self) -> (u64, Vec<Block>) {
        (self.length, self.chain)
    }
}

impl Paged for HeaderPage {
    type Item = HeaderRecord;
    fn into_parts(self) -> (u64, Vec<HeaderRecord>) {
        (self.length, self.headers)
    }
}

impl HttpPeerTransport {
    /// `request_timeout` bounds every single HTTP request.
    pub(crate) fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("building peer http client")?;
        Ok(Self { client })
    }

    async fn get_json<T: DeserializeOwned>(&self, peer: &str, path: &str) -> Result<T> {
        let url = format!("http://{peer}{path}");
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = res.status();
        if !status.is_success() {
            bail!("GET {url} returned {status}");
        }
        res.json().await.with_context(|| format!("decoding {url}"))
    }

    /// Walk `path` in `page_size` steps until the peer's reported length is read.
    async fn fetch_all<P>(&self, peer: &str, path: &str, page_size: u32) -> Result<Vec<P::Item>>
    where
        P: Paged + DeserializeOwned,
    {
        let page_size = page_size.max(1);
        let mut items = Vec::new();
        loop {
            let start = items.len() as u64 + 1;
            let page: P = self
                .get_json(peer, &format!("{path}?start={start}&limit={page_size}"))
                .await?;
            let (length, batch) = page.into_parts();
            debug!(peer, path, start, received = batch.len(), length, "fetched page");
            if batch.is_empty() {
                break;
            }
            items.extend(batch);
            if items.len() as u64 >= length {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn chain_length(&self, peer: &str) -> Result<u64> {
        let res: LengthResponse = self.get_json(peer, "/chain/length").await?;
        Ok(res.length)
    }

    async fn fetch_chain(&self, peer: &str, page_size: u32) -> Result<Vec<Block>> {
        self.fetch_all::<ChainPage>(peer, "/chain", page_size).await
    }

    async fn fetch_headers(&self, peer: &str, page_size: u32) -> Result<Vec<HeaderRecord>> {
        self.fetch_all::<HeaderPage>(peer, "/headers", page_size).await
    }
}
