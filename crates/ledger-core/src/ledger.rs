use crate::chain::{validate_chain, validate_successor};
use crate::consensus::{PeerTransport, Resolver};
use crate::constants::{
    GENESIS_AMOUNT, GENESIS_SENDER, MINING_REWARD, POW_TARGET_DIFFICULTY, SYSTEM_ADDRESS, ZERO_HASH,
};
use crate::error::{LedgerError, LedgerResult};
use crate::mine::{pow, MiningJob, MiningWorker};
use crate::store::ChainStore;
use crate::validate::{self, BalanceSource};
use crate::{merkle_root, Block, BlockHeader, HeaderRecord, SignedTransaction, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// Required leading zero hex digits; blocks at any other difficulty are invalid.
    pub difficulty: u32,
    pub mining_reward: f64,
    /// This node's own `host:port`, skipped during conflict resolution.
    pub self_address: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: POW_TARGET_DIFFICULTY,
            mining_reward: MINING_REWARD,
            self_address: None,
        }
    }
}

/// Confirmed balances per address, maintained alongside the chain. Always
/// equal to a full scan of the chain.
#[derive(Debug, Default)]
struct BalanceIndex {
    balances: HashMap<String, f64>,
}

impl BalanceIndex {
    fn record(&mut self, block: &Block) {
        for tx in &block.transactions {
            *self.balances.entry(tx.receiver.clone()).or_default() += tx.amount;
            *self.balances.entry(tx.sender.clone()).or_default() -= tx.amount;
        }
    }

    fn rebuild(blocks: &[Block]) -> Self {
        let mut index = Self::default();
        for block in blocks {
            index.record(block);
        }
        index
    }
}

/// Normalise a peer address to `host:port`. Accepts bare `host:port` or a
/// URL such as `http://host:port/path`.
pub fn normalize_peer(address: &str) -> Option<String> {
    let trimmed = address.trim();
    let rest = trimmed.split_once("://").map_or(trimmed, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let (host, port) = authority.rsplit_once(':')?;
    if host.is_empty() || host.contains(|c: char| c.is_whitespace() || c == '@') {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some(format!("{}:{port}", host.to_ascii_lowercase()))
}

/// The ledger aggregate: block sequence, mempool and peer set.
pub struct Ledger<S: ChainStore> {
    config: LedgerConfig,
    store: Arc<S>,
    blocks: Vec<Block>,
    mempool: Vec<Transaction>,
    peers: BTreeSet<String>,
    balances: BalanceIndex,
}

impl<S: ChainStore> std::fmt::Debug for Ledger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("config", &self.config)
            .field("height", &self.blocks.len())
            .field("mempool", &self.mempool.len())
            .field("peers", &self.peers)
            .finish()
    }
}

impl<S: ChainStore> Ledger<S> {
    /// Load the stored chain, or mine and persist a genesis block when the
    /// store is empty.
    pub fn open(store: Arc<S>, config: LedgerConfig) -> LedgerResult<Self> {
        let mut blocks = store.load_chain().map_err(LedgerError::Storage)?;
        if blocks.is_empty() {
            let genesis = genesis_block(config.difficulty);
            store.append_block(&genesis).map_err(LedgerError::Storage)?;
            info!(hash = %genesis.hash, "created genesis block");
            blocks.push(genesis);
        } else {
            validate_chain(&blocks, config.difficulty)?;
            info!(height = blocks.len(), "loaded chain from storage");
        }
        let balances = BalanceIndex::rebuild(&blocks);
        let config = LedgerConfig {
            self_address: config.self_address.as_deref().and_then(normalize_peer),
            ..config
        };
        Ok(Self {
            config,
            store,
            blocks,
            mempool: Vec::new(),
            peers: BTreeSet::new(),
            balances,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn len(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, index: u64) -> Option<&Block> {
        index
            .checked_sub(1)
            .and_then(|i| self.blocks.get(i as usize))
    }

    /// Up to `limit` blocks starting at chain index `start`.
    pub fn blocks_page(&self, start: u64, limit: usize) -> &[Block] {
        let from = (start.max(1) - 1).min(self.len()) as usize;
        let to = from.saturating_add(limit).min(self.blocks.len());
        &self.blocks[from..to]
    }

    pub fn headers_page(&self, start: u64, limit: usize) -> Vec<HeaderRecord> {
        self.blocks_page(start, limit)
            .iter()
            .map(Block::header_record)
            .collect()
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn mempool(&self) -> &[Transaction] {
        &self.mempool
    }

    pub fn peers(&self) -> impl Iterator<Item = &String> {
        self.peers.iter()
    }

    /// Add a peer; idempotent. Returns the normalised `host:port`.
    pub fn register_node(&mut self, address: &str) -> LedgerResult<String> {
        let peer = normalize_peer(address)
            .ok_or_else(|| LedgerError::InvalidAddress(address.to_string()))?;
        if self.peers.insert(peer.clone()) {
            info!(peer, "registered peer");
        }
        Ok(peer)
    }

    /// Validate a signed transaction against confirmed and pending balances
    /// and queue it. Returns the transaction hash.
    pub fn submit_transaction(&mut self, signed: SignedTransaction) -> LedgerResult<String> {
        if let Err(err) = validate::validate(&signed, &*self, &self.mempool) {
            warn!(
                kind = err.kind(),
                sender = %signed.transaction.sender,
                "rejected transaction: {err}"
            );
            return Err(err.into());
        }
        let tx = signed.transaction;
        let hash = tx.hash();
        debug!(hash, pending = self.mempool.len() + 1, "accepted transaction");
        self.mempool.push(tx);
        Ok(hash)
    }

    /// Coinbase first, then the mempool in arrival order, over the current tip.
    pub fn mining_template(&self, miner_address: &str) -> MiningJob {
        let mut transactions = Vec::with_capacity(self.mempool.len() + 1);
        transactions.push(Transaction::coinbase(miner_address, self.config.mining_reward));
        transactions.extend(self.mempool.iter().cloned());

        let (index, previous_hash) = match self.blocks.last() {
            Some(tip) => (tip.index + 1, tip.hash.clone()),
            None => (1, ZERO_HASH.to_string()),
        };
        let header = BlockHeader::new(
            previous_hash,
            merkle_root(&transactions),
            self.config.difficulty,
        );
        MiningJob {
            index,
            transactions,
            header,
        }
    }

    /// Persist `block` and publish it as the new tip. On any failure the
    /// chain and mempool are left exactly as they were.
    pub fn append_block(&mut self, block: Block) -> LedgerResult<()> {
        if let Some(tip) = self.blocks.last() {
            if block.index != tip.index + 1 || block.previous_hash != tip.hash {
                return Err(LedgerError::StaleTip);
            }
        }
        validate_successor(&block, self.blocks.last(), self.config.difficulty)?;
        self.store.append_block(&block).map_err(LedgerError::Storage)?;

        // Index 0 is the block's own reward.
        for tx in block.transactions.iter().skip(1) {
            if let Some(pos) = self.mempool.iter().position(|p| p == tx) {
                self.mempool.remove(pos);
            }
        }
        self.balances.record(&block);
        info!(
            index = block.index,
            hash = %block.hash,
            pending = self.mempool.len(),
            "appended block"
        );
        self.blocks.push(block);
        Ok(())
    }

    /// Swap in `chain` wholesale after full validation and drop the mempool.
    pub fn replace_chain(&mut self, chain: Vec<Block>) -> LedgerResult<()> {
        validate_chain(&chain, self.config.difficulty)?;
        self.store.replace_chain(&chain).map_err(LedgerError::Storage)?;
        let dropped = self.mempool.len();
        self.balances = BalanceIndex::rebuild(&chain);
        self.blocks = chain;
        self.mempool.clear();
        info!(height = self.blocks.len(), dropped, "replaced chain");
        Ok(())
    }

    pub fn total_balance(&self, address: &str) -> f64 {
        self.confirmed_balance(address)
    }
}

impl<S: ChainStore> BalanceSource for Ledger<S> {
    fn confirmed_balance(&self, address: &str) -> f64 {
        self.balances.balances.get(address).copied().unwrap_or(0.0)
    }
}

pub fn genesis_block(difficulty: u32) -> Block {
    let tx = Transaction::new(GENESIS_SENDER, SYSTEM_ADDRESS, GENESIS_AMOUNT);
    pow::seal_block(1, vec![tx], ZERO_HASH, difficulty)
}

/// Shared, serialised access to a [`Ledger`] plus the mining worker.
///
/// Every read and write goes through one mutex. Mining holds it only to take
/// a template and to append the result; the search runs on the worker.
pub struct LedgerHandle<S: ChainStore> {
    inner: Arc<Mutex<Ledger<S>>>,
    worker: MiningWorker,
    mining: Arc<Mutex<()>>,
}

impl<S: ChainStore> Clone for LedgerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            worker: self.worker.clone(),
            mining: Arc::clone(&self.mining),
        }
    }
}

impl<S: ChainStore> LedgerHandle<S> {
    pub fn new(ledger: Ledger<S>, worker: MiningWorker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
            worker,
            mining: Arc::new(Mutex::new(())),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Ledger<S>> {
        self.inner.lock().await
    }

    pub async fn submit_transaction(&self, signed: SignedTransaction) -> LedgerResult<String> {
        self.inner.lock().await.submit_transaction(signed)
    }

    pub async fn register_node(&self, address: &str) -> LedgerResult<String> {
        self.inner.lock().await.register_node(address)
    }

    pub async fn total_balance(&self, address: &str) -> f64 {
        self.inner.lock().await.total_balance(address)
    }

    /// Mine the current mempool into a block paying `miner_address`. If the
    /// chain moves while the worker searches, the block is dropped with
    /// [`LedgerError::StaleTip`] and the mempool keeps its transactions.
    pub async fn mine(&self, miner_address: &str) -> LedgerResult<Block> {
        let _gate = self.mining.lock().await;
        let job = self.inner.lock().await.mining_template(miner_address);
        let block = self.worker.submit(job).await?;
        self.inner.lock().await.append_block(block.clone())?;
        Ok(block)
    }

    pub async fn resolve_conflicts<T: PeerTransport>(
        &self,
        resolver: &Resolver<T>,
    ) -> LedgerResult<bool> {
        resolver.resolve(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TxError;
    use crate::store::{ChainStore, MemStore};
    use crate::wallet::Keypair;
    use anyhow::{bail, Result};

    const DIFFICULTY: u32 = 2;

    fn config() -> LedgerConfig {
        LedgerConfig {
            difficulty: DIFFICULTY,
            ..LedgerConfig::default()
        }
    }

    fn ledger() -> Ledger<MemStore> {
        Ledger::open(Arc::new(MemStore::new()), config()).unwrap()
    }

    fn mine_local<S: ChainStore>(ledger: &mut Ledger<S>, miner: &str) -> LedgerResult<Block> {
        let block = ledger.mining_template(miner).run();
        ledger.append_block(block.clone())?;
        Ok(block)
    }

    /// Accepts reads, refuses every write.
    struct ReadOnlyStore(MemStore);

    impl ChainStore for ReadOnlyStore {
        fn append_block(&self, _block: &Block) -> Result<()> {
            bail!("disk full")
        }
        fn get_block(&self, index: u64) -> Result<Option<Block>> {
            self.0.get_block(index)
        }
        fn last_block(&self) -> Result<Option<Block>> {
            self.0.last_block()
        }
        fn list_blocks(&self, start: u64, limit: usize) -> Result<Vec<Block>> {
            self.0.list_blocks(start, limit)
        }
        fn len(&self) -> Result<u64> {
            self.0.len()
        }
        fn replace_chain(&self, _chain: &[Block]) -> Result<()> {
            bail!("disk full")
        }
    }

    #[test]
    fn open_creates_genesis() {
        let ledger = ledger();
        assert_eq!(ledger.len(), 1);
        let genesis = ledger.last_block().unwrap();
        assert_eq!(genesis.index, 1);
        assert_eq!(genesis.previous_hash, ZERO_HASH);
        assert_eq!(genesis.transactions.len(), 1);
        assert_eq!(ledger.total_balance(SYSTEM_ADDRESS), GENESIS_AMOUNT);
        assert_eq!(ledger.store().len().unwrap(), 1);
    }

    #[test]
    fn reopen_loads_existing_chain() {
        let store = Arc::new(MemStore::new());
        let mut first = Ledger::open(Arc::clone(&store), config()).unwrap();
        mine_local(&mut first, "miner").unwrap();
        let reopened = Ledger::open(store, config()).unwrap();
        assert_eq!(reopened.blocks(), first.blocks());
        assert_eq!(reopened.total_balance("miner"), MINING_REWARD);
    }

    #[test]
    fn reopen_rejects_chain_at_other_difficulty() {
        let store = Arc::new(MemStore::new());
        Ledger::open(Arc::clone(&store), config()).unwrap();
        let err = Ledger::open(
            store,
            LedgerConfig {
                difficulty: 1,
                ..config()
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), "DifficultyMismatch");
    }

    #[test]
    fn mining_empty_mempool_pays_reward_only() {
        let mut ledger = ledger();
        let block = mine_local(&mut ledger, "miner").unwrap();
        assert_eq!(block.index, 2);
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_coinbase());
        assert_eq!(ledger.total_balance("miner"), MINING_REWARD);
        assert_eq!(validate_chain(ledger.blocks(), DIFFICULTY), Ok(()));
    }

    #[test]
    fn mined_block_carries_mempool_and_clears_it() {
        let mut ledger = ledger();
        let alice = Keypair::generate();
        mine_local(&mut ledger, &alice.address()).unwrap();

        let signed = alice.sign_transaction(Transaction::new(alice.address(), "bob", 4.0)).unwrap();
        let hash = ledger.submit_transaction(signed).unwrap();
        assert_eq!(ledger.mempool().len(), 1);
        assert_eq!(ledger.mempool()[0].hash(), hash);

        let block = mine_local(&mut ledger, "miner").unwrap();
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[1].hash(), hash);
        assert!(ledger.mempool().is_empty());
        assert_eq!(ledger.total_balance(&alice.address()), MINING_REWARD - 4.0);
        assert_eq!(ledger.total_balance("bob"), 4.0);
    }

    #[test]
    fn balance_index_matches_full_scan() {
        let mut ledger = ledger();
        let alice = Keypair::generate();
        mine_local(&mut ledger, &alice.address()).unwrap();
        mine_local(&mut ledger, &alice.address()).unwrap();
        for amount in [1.5, 2.25, 3.0] {
            let signed = alice
                .sign_transaction(Transaction::new(alice.address(), "bob", amount))
                .unwrap();
            ledger.submit_transaction(signed).unwrap();
        }
        mine_local(&mut ledger, "carol").unwrap();
        for address in [alice.address().as_str(), "bob", "carol", SYSTEM_ADDRESS, GENESIS_SENDER] {
            assert_eq!(
                ledger.total_balance(address),
                ledger.blocks().confirmed_balance(address),
                "{address}"
            );
        }
    }

    #[test]
    fn double_spend_against_pending_rejected() {
        let mut ledger = ledger();
        let alice = Keypair::generate();
        mine_local(&mut ledger, &alice.address()).unwrap();
        let first = alice.sign_transaction(Transaction::new(alice.address(), "bob", 8.0)).unwrap();
        ledger.submit_transaction(first).unwrap();
        let second = alice
            .sign_transaction(Transaction::new(alice.address(), "carol", 8.0))
            .unwrap();
        let err = ledger.submit_transaction(second).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Transaction(TxError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger.mempool().len(), 1);
    }

    #[test]
    fn storage_failure_keeps_chain_and_mempool() {
        let store = MemStore::new();
        let genesis = genesis_block(DIFFICULTY);
        store.append_block(&genesis).unwrap();
        let mut ledger = Ledger::open(Arc::new(ReadOnlyStore(store)), config()).unwrap();
        let pending = SignedTransaction {
            transaction: Transaction::coinbase("faucet-user", 50.0),
            signature: String::new(),
            public_key: None,
        };
        ledger.submit_transaction(pending).unwrap();

        let err = mine_local(&mut ledger, "miner").unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.mempool().len(), 1);
        assert_eq!(ledger.total_balance("miner"), 0.0);
    }

    #[test]
    fn append_rejects_stale_and_invalid_blocks() {
        let mut ledger = ledger();
        let stale = ledger.mining_template("miner").run();
        mine_local(&mut ledger, "miner").unwrap();
        assert!(matches!(ledger.append_block(stale), Err(LedgerError::StaleTip)));

        let mut forged = ledger.mining_template("miner").run();
        forged.transactions[0].amount = 1_000.0;
        assert!(matches!(ledger.append_block(forged), Err(LedgerError::Chain(_))));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn replace_chain_swaps_state_and_clears_mempool() {
        let mut ours = ledger();
        let mut theirs = ledger();
        for _ in 0..3 {
            mine_local(&mut theirs, "remote-miner").unwrap();
        }
        let faucet = SignedTransaction {
            transaction: Transaction::coinbase("someone", 5.0),
            signature: String::new(),
            public_key: None,
        };
        ours.submit_transaction(faucet).unwrap();
        mine_local(&mut ours, "local-miner").unwrap();
        ours.submit_transaction(SignedTransaction {
            transaction: Transaction::coinbase("someone", 1.0),
            signature: String::new(),
            public_key: None,
        })
        .unwrap();

        ours.replace_chain(theirs.blocks().to_vec()).unwrap();
        assert_eq!(ours.blocks(), theirs.blocks());
        assert!(ours.mempool().is_empty());
        assert_eq!(ours.total_balance("local-miner"), 0.0);
        assert_eq!(ours.total_balance("remote-miner"), 3.0 * MINING_REWARD);
        assert_eq!(ours.store().load_chain().unwrap(), theirs.blocks());
    }

    #[test]
    fn replace_chain_rejects_invalid_candidate() {
        let mut ours = ledger();
        let mut theirs = ledger();
        mine_local(&mut theirs, "remote").unwrap();
        let mut candidate = theirs.blocks().to_vec();
        candidate[1].transactions[0].amount = 99.0;
        let before = ours.blocks().to_vec();
        assert!(ours.replace_chain(candidate).is_err());
        assert_eq!(ours.blocks(), before.as_slice());
    }

    #[test]
    fn register_node_normalises_and_is_idempotent() {
        let mut ledger = ledger();
        assert_eq!(ledger.register_node("127.0.0.1:5001").unwrap(), "127.0.0.1:5001");
        assert_eq!(
            ledger.register_node("http://LocalHost:5002/chain").unwrap(),
            "localhost:5002"
        );
        ledger.register_node("http://127.0.0.1:5001").unwrap();
        assert_eq!(ledger.peers().count(), 2);
        for bad in ["", "no-port", "host:notaport", ":8080", "http://", "host:99999"] {
            assert!(
                matches!(ledger.register_node(bad), Err(LedgerError::InvalidAddress(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn pages_are_bounded() {
        let mut ledger = ledger();
        for _ in 0..4 {
            mine_local(&mut ledger, "m").unwrap();
        }
        let page: Vec<u64> = ledger.blocks_page(2, 2).iter().map(|b| b.index).collect();
        assert_eq!(page, vec![2, 3]);
        assert_eq!(ledger.blocks_page(0, 100).len(), 5);
        assert!(ledger.blocks_page(10, 5).is_empty());
        assert_eq!(ledger.headers_page(5, 5)[0].index, 5);
        assert_eq!(ledger.block(3).unwrap().index, 3);
        assert!(ledger.block(0).is_none());
    }

    #[tokio::test]
    async fn handle_mines_on_worker() {
        let handle = LedgerHandle::new(ledger(), MiningWorker::spawn().unwrap());
        let block = handle.mine("miner").await.unwrap();
        assert_eq!(block.index, 2);
        assert_eq!(handle.total_balance("miner").await, MINING_REWARD);
        assert_eq!(handle.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_mines_are_serialised() {
        let handle = LedgerHandle::new(ledger(), MiningWorker::spawn().unwrap());
        let (a, b) = tokio::join!(handle.mine("a"), handle.mine("b"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.index, b.index);
        let ledger = handle.lock().await;
        assert_eq!(ledger.len(), 3);
        assert_eq!(validate_chain(ledger.blocks(), DIFFICULTY), Ok(()));
    }
}
