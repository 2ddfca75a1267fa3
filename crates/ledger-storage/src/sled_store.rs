use anyhow::{anyhow, Context, Result};
use ledger_core::store::ChainStore;
use ledger_core::Block;
use sled::transaction::TransactionResult;
use sled::{Db, IVec, Tree};
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";

/// Blocks keyed by big-endian chain index, so sled's key order is chain order.
#[derive(Clone, Debug)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled db at {}", path.display()))?;
    let blocks = db.open_tree(TREE_BLOCKS)?;
    info!(path = %path.display(), blocks = blocks.len(), "sled store opened");
    Ok(Self { db, blocks })
  }

  fn key(index: u64) -> [u8; 8] {
    index.to_be_bytes()
  }

  fn decode(key: &[u8], value: &IVec) -> Result<Block> {
    bincode::deserialize(value)
      .with_context(|| format!("corrupt block record under key {}", describe_key(key)))
  }
}

fn describe_key(key: &[u8]) -> String {
  <[u8; 8]>::try_from(key)
    .map_or_else(|_| format!("{key:?}"), |k| u64::from_be_bytes(k).to_string())
}

impl ChainStore for SledStore {
  fn append_block(&self, block: &Block) -> Result<()> {
    let bytes = bincode::serialize(block)?;
    self.blocks.insert(Self::key(block.index), bytes)?;
    self.db.flush()?;
    debug!(index = block.index, "persisted block");
    Ok(())
  }

  fn get_block(&self, index: u64) -> Result<Option<Block>> {
    let key = Self::key(index);
    self
      .blocks
      .get(key)?
      .map(|value| Self::decode(&key, &value))
      .transpose()
  }

  fn last_block(&self) -> Result<Option<Block>> {
    self
      .blocks
      .last()?
      .map(|(key, value)| Self::decode(&key, &value))
      .transpose()
  }

  fn list_blocks(&self, start: u64, limit: usize) -> Result<Vec<Block>> {
    self
      .blocks
      .range(Self::key(start.max(1))..)
      .take(limit)
      .map(|entry| {
        let (key, value) = entry?;
        Self::decode(&key, &value)
      })
      .collect()
  }

  fn len(&self) -> Result<u64> {
    Ok(self.blocks.len() as u64)
  }

  fn replace_chain(&self, chain: &[Block]) -> Result<()> {
    let stale: Vec<IVec> = self.blocks.iter().keys().collect::<Result<_, _>>()?;
    let fresh = chain
      .iter()
      .map(|block| Ok((Self::key(block.index), bincode::serialize(block)?)))
      .collect::<Result<Vec<_>>>()?;

    let result: TransactionResult<()> = self.blocks.transaction(|tx| {
      for key in &stale {
        tx.remove(key)?;
      }
      for (key, bytes) in &fresh {
        tx.insert(&key[..], bytes.as_slice())?;
      }
      Ok(())
    });
    result.map_err(|err| anyhow!("replacing stored chain failed: {err:?}"))?;
    self.db.flush()?;
    info!(removed = stale.len(), written = fresh.len(), "replaced stored chain");
    Ok(())
  }

  fn flush(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }
}
