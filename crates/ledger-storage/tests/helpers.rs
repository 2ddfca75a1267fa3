use ledger_core::constants::ZERO_HASH;
use ledger_core::mine::pow::seal_block;
use ledger_core::{Block, Transaction};
use ledger_storage::SledStore;
use tempfile::{tempdir, TempDir};

/// Proof of work is irrelevant to storage, so blocks are sealed at difficulty 0.
pub const DIFFICULTY: u32 = 0;

pub fn create_temp_store() -> (TempDir, SledStore) {
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = SledStore::open(temp_dir.path()).expect("Failed to open SledStore");
    (temp_dir, store)
}

pub fn transfer(i: usize) -> Transaction {
    Transaction {
        sender: format!("sender_{i}"),
        receiver: format!("receiver_{i}"),
        amount: 0.5 + i as f64,
        timestamp: 1_600_000_000.25 + i as f64,
    }
}

/// A linked chain of `len` blocks, each carrying `txs_per_block` transfers.
pub fn build_chain(len: usize, txs_per_block: usize) -> Vec<Block> {
    let mut chain: Vec<Block> = Vec::with_capacity(len);
    for i in 0..len {
        let prev = chain.last().map_or(ZERO_HASH.to_string(), |b| b.hash.clone());
        let txs = (0..txs_per_block).map(|t| transfer(i * txs_per_block + t)).collect();
        chain.push(seal_block(i as u64 + 1, txs, &prev, DIFFICULTY));
    }
    chain
}
