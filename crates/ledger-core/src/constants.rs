pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const ADDRESS_HEX_SIZE: usize = 40;
pub const BLOCKS_PER_BATCH: u32 = 25;
pub const MAX_BLOCKS_PER_REQUEST: u32 = BLOCKS_PER_BATCH * 10;
pub const POW_TARGET_DIFFICULTY: u32 = 4;
pub const MINING_REWARD: f64 = 10.0;
pub const PEER_TIMEOUT_MS: u64 = 5_000;

/// Previous-hash of the genesis block.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Sender of coinbase transactions; exempt from signature and balance checks.
pub const SYSTEM_ADDRESS: &str = "0000000000000000000000000000000000000000";

pub const GENESIS_SENDER: &str = "system";
pub const GENESIS_AMOUNT: f64 = 1000.0;

/// `SHA256("")`, the merkle root of an empty transaction list.
pub const EMPTY_MERKLE_ROOT: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
