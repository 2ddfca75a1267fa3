use thiserror::Error;

/// Reasons a submitted transaction is refused by the mempool validator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TxError {
    #[error("{field} address is required")]
    MissingField { field: &'static str },
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("public key does not match sender address")]
    AddressMismatch,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: f64, required: f64 },
}

impl TxError {
    pub fn kind(&self) -> &'static str {
        match self {
            TxError::MissingField { .. } => "MissingField",
            TxError::NonPositiveAmount => "NonPositiveAmount",
            TxError::AddressMismatch => "AddressMismatch",
            TxError::InvalidSignature => "InvalidSignature",
            TxError::InsufficientFunds { .. } => "InsufficientFunds",
        }
    }
}

/// Reasons a block or header sequence is rejected. Always fatal to the whole sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("block {index}: difficulty {found} does not match required {expected}")]
    DifficultyMismatch { index: u64, expected: u32, found: u32 },
    #[error("block {index}: stored hash does not match recomputed header hash")]
    HashMismatch { index: u64 },
    #[error("block {index}: hash does not satisfy proof of work")]
    ProofOfWorkInvalid { index: u64 },
    #[error("block {index}: previous hash does not link to prior block")]
    LinkageMismatch { index: u64 },
    #[error("block {index}: merkle root does not match transactions")]
    MerkleMismatch { index: u64 },
    #[error("block {index}: expected index {expected}")]
    IndexMismatch { index: u64, expected: u64 },
    #[error("block {index}: transactions missing")]
    MissingBody { index: u64 },
}

impl ChainError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChainError::DifficultyMismatch { .. } => "DifficultyMismatch",
            ChainError::HashMismatch { .. } => "HashMismatch",
            ChainError::ProofOfWorkInvalid { .. } => "ProofOfWorkInvalid",
            ChainError::LinkageMismatch { .. } => "LinkageMismatch",
            ChainError::MerkleMismatch { .. } => "MerkleMismatch",
            ChainError::IndexMismatch { .. } => "IndexMismatch",
            ChainError::MissingBody { .. } => "MissingBody",
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Transaction(#[from] TxError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("invalid node address: {0}")]
    InvalidAddress(String),
    #[error("block does not extend the current tip")]
    StaleTip,
    #[error("mining worker stopped before returning a result")]
    MiningAborted,
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl LedgerError {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Transaction(e) => e.kind(),
            LedgerError::Chain(e) => e.kind(),
            LedgerError::InvalidAddress(_) => "InvalidAddress",
            LedgerError::StaleTip => "StaleTip",
            LedgerError::MiningAborted => "MiningAborted",
            LedgerError::Storage(_) => "Storage",
        }
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
