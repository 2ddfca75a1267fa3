use crate::codec::{header_prefix, meets_difficulty};
use crate::error::{LedgerError, LedgerResult};
use crate::{merkle_root, Block, BlockHeader, Transaction};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

pub mod pow {
    use super::*;
    use rayon::prelude::*;
    use sha2::{Digest, Sha256};

    /// Nonces checked per parallel round.
    const NONCE_WINDOW: u64 = 1 << 14;

    /// Search nonces upward from 0 until the header hash has at least
    /// `header.difficulty` leading zero hex digits. Windows are scanned in
    /// parallel but the lowest qualifying nonce always wins, so the result is
    /// the same as a sequential scan.
    pub fn mine(mut header: BlockHeader) -> (BlockHeader, String) {
        let difficulty = header.difficulty;
        let mut prefix = Sha256::new();
        prefix.update(header_prefix(&header).as_bytes());
        let suffix = difficulty.to_string();

        let attempt = |nonce: u64| -> String {
            let mut hasher = prefix.clone();
            hasher.update(nonce.to_string().as_bytes());
            hasher.update(suffix.as_bytes());
            hex::encode(hasher.finalize())
        };

        let mut start = 0u64;
        loop {
            let end = start.saturating_add(NONCE_WINDOW);
            let found = (start..end)
                .into_par_iter()
                .map(|nonce| (nonce, attempt(nonce)))
                .find_first(|(_, hash)| meets_difficulty(hash, difficulty));
            if let Some((nonce, hash)) = found {
                header.nonce = nonce;
                return (header, hash);
            }
            start = end;
        }
    }

    /// Assemble, mine and seal a block over `transactions` in the given order.
    pub fn seal_block(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: &str,
        difficulty: u32,
    ) -> Block {
        let header = BlockHeader::new(previous_hash, merkle_root(&transactions), difficulty);
        MiningJob {
            index,
            transactions,
            header,
        }
        .run()
    }
}

/// Everything the miner needs to seal one block.
#[derive(Clone, Debug)]
pub struct MiningJob {
    pub index: u64,
    pub transactions: Vec<Transaction>,
    pub header: BlockHeader,
}

impl MiningJob {
    pub fn run(self) -> Block {
        let (header, hash) = pow::mine(self.header);
        info!(
            index = self.index,
            nonce = header.nonce,
            txs = self.transactions.len(),
            "mined block {hash}"
        );
        Block::seal(self.index, self.transactions, header, hash)
    }
}

struct Request {
    job: MiningJob,
    reply: oneshot::Sender<Block>,
}

/// Proof-of-work runs on its own OS thread so request handling never waits on it.
#[derive(Clone, Debug)]
pub struct MiningWorker {
    jobs: mpsc::UnboundedSender<Request>,
}

impl MiningWorker {
    pub fn spawn() -> std::io::Result<Self> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Request>();
        std::thread::Builder::new()
            .name("pow-miner".to_string())
            .spawn(move || {
                while let Some(Request { job, reply }) = rx.blocking_recv() {
                    let index = job.index;
                    if reply.send(job.run()).is_err() {
                        debug!(index, "mined block discarded by caller");
                    }
                }
                debug!("mining worker stopped");
            })?;
        Ok(Self { jobs })
    }

    /// Queue a job. Dropping the returned handle discards the result; the
    /// search itself is not interrupted.
    pub fn submit(&self, job: MiningJob) -> MiningHandle {
        let (reply, rx) = oneshot::channel();
        // A closed worker drops `reply`, which resolves the handle to `MiningAborted`.
        let _ = self.jobs.send(Request { job, reply });
        MiningHandle { rx }
    }
}

#[derive(Debug)]
pub struct MiningHandle {
    rx: oneshot::Receiver<Block>,
}

impl Future for MiningHandle {
    type Output = LedgerResult<Block>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| LedgerError::MiningAborted))
    }
}
