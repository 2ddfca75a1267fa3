use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod chain;
pub mod codec;
pub mod constants;
pub mod consensus;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod mine;
pub mod store;
pub mod validate;
pub mod wallet;

pub use error::{ChainError, LedgerError, LedgerResult, TxError};
pub use merkle::merkle_root;

/// Seconds since the unix epoch with sub-second precision.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: f64,
    pub timestamp: f64,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, amount: f64) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            timestamp: now_secs(),
        }
    }

    /// Reward issuance to `miner`; always the first transaction of a mined block.
    pub fn coinbase(miner: impl Into<String>, reward: f64) -> Self {
        Self::new(constants::SYSTEM_ADDRESS, miner, reward)
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender == constants::SYSTEM_ADDRESS
    }

    pub fn hash(&self) -> String {
        codec::hash_transaction(self)
    }
}

/// Intake payload: a transaction plus the proof that its sender authorised it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: String,
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub previous_hash: String,
    pub merkle_root: String,
    pub timestamp: f64,
    pub nonce: u64,
    pub difficulty: u32,
}

impl BlockHeader {
    pub fn new(
        previous_hash: impl Into<String>,
        merkle_root: impl Into<String>,
        difficulty: u32,
    ) -> Self {
        Self {
            previous_hash: previous_hash.into(),
            merkle_root: merkle_root.into(),
            timestamp: now_secs(),
            nonce: 0,
            difficulty,
        }
    }

    pub fn hash(&self) -> String {
        codec::hash_header(self)
    }
}

/// A sealed block in its wire layout: the header fields sit next to `index`,
/// `transactions` and `hash` rather than under a nested object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub merkle_root: String,
    pub timestamp: f64,
    pub nonce: u64,
    pub difficulty: u32,
    pub hash: String,
}

impl Block {
    pub(crate) fn seal(
        index: u64,
        transactions: Vec<Transaction>,
        header: BlockHeader,
        hash: String,
    ) -> Self {
        Self {
            index,
            transactions,
            previous_hash: header.previous_hash,
            merkle_root: header.merkle_root,
            timestamp: header.timestamp,
            nonce: header.nonce,
            difficulty: header.difficulty,
            hash,
        }
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            previous_hash: self.previous_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            timestamp: self.timestamp,
            nonce: self.nonce,
            difficulty: self.difficulty,
        }
    }

    pub fn header_record(&self) -> HeaderRecord {
        HeaderRecord {
            index: self.index,
            previous_hash: self.previous_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            timestamp: self.timestamp,
            nonce: self.nonce,
            difficulty: self.difficulty,
            hash: self.hash.clone(),
        }
    }
}

/// Header-only view of a block, exchanged during headers-first sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub index: u64,
    pub previous_hash: String,
    pub merkle_root: String,
    pub timestamp: f64,
    pub nonce: u64,
    pub difficulty: u32,
    pub hash: String,
}

impl HeaderRecord {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            previous_hash: self.previous_hash.clone(),
            merkle_root: self.merkle_root.clone(),
            timestamp: self.timestamp,
            nonce: self.nonce,
            difficulty: self.difficulty,
        }
    }
}
