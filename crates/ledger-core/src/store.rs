use crate::Block;
use anyhow::{anyhow, Result};
use std::sync::{Mutex, MutexGuard};

/// Persistence the ledger delegates to. Lives in `ledger-core` so storage
/// backends can depend on the core without a cycle.
///
/// Blocks are addressed by their 1-based chain index.
pub trait ChainStore: Send + Sync {
    fn append_block(&self, block: &Block) -> Result<()>;
    fn get_block(&self, index: u64) -> Result<Option<Block>>;
    fn last_block(&self) -> Result<Option<Block>>;
    /// Up to `limit` blocks starting at `start`, in chain order.
    fn list_blocks(&self, start: u64, limit: usize) -> Result<Vec<Block>>;
    fn len(&self) -> Result<u64>;
    /// Swap the whole stored chain for `chain`; all-or-nothing.
    fn replace_chain(&self, chain: &[Block]) -> Result<()>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn load_chain(&self) -> Result<Vec<Block>> {
        self.list_blocks(1, usize::MAX)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Volatile store, for tests and throwaway nodes.
#[derive(Debug, Default)]
pub struct MemStore {
    blocks: Mutex<Vec<Block>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blocks(&self) -> Result<MutexGuard<'_, Vec<Block>>> {
        self.blocks.lock().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl ChainStore for MemStore {
    fn append_block(&self, block: &Block) -> Result<()> {
        self.blocks()?.push(block.clone());
        Ok(())
    }

    fn get_block(&self, index: u64) -> Result<Option<Block>> {
        let blocks = self.blocks()?;
        Ok(index
            .checked_sub(1)
            .and_then(|i| blocks.get(i as usize))
            .cloned())
    }

    fn last_block(&self) -> Result<Option<Block>> {
        Ok(self.blocks()?.last().cloned())
    }

    fn list_blocks(&self, start: u64, limit: usize) -> Result<Vec<Block>> {
        let blocks = self.blocks()?;
        let skip = start.saturating_sub(1) as usize;
        Ok(blocks.iter().skip(skip).take(limit).cloned().collect())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.blocks()?.len() as u64)
    }

    fn replace_chain(&self, chain: &[Block]) -> Result<()> {
        *self.blocks()? = chain.to_vec();
        Ok(())
    }
}
