use crate::codec::{hash_header, meets_difficulty};
use crate::constants::ZERO_HASH;
use crate::error::ChainError;
use crate::{merkle_root, Block, BlockHeader, HeaderRecord, Transaction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMode {
    /// Recompute every hash from the transaction bodies.
    Full,
    /// Header fields only; used to pre-screen a peer before downloading bodies.
    HeadersOnly,
}

/// One element of a sequence under validation.
pub trait ChainLink {
    fn index(&self) -> u64;
    fn header(&self) -> BlockHeader;
    fn stored_hash(&self) -> &str;
    fn transactions(&self) -> Option<&[Transaction]>;
}

impl ChainLink for Block {
    fn index(&self) -> u64 {
        self.index
    }

    fn header(&self) -> BlockHeader {
        Block::header(self)
    }

    fn stored_hash(&self) -> &str {
        &self.hash
    }

    fn transactions(&self) -> Option<&[Transaction]> {
        Some(&self.transactions)
    }
}

impl ChainLink for HeaderRecord {
    fn index(&self) -> u64 {
        self.index
    }

    fn header(&self) -> BlockHeader {
        HeaderRecord::header(self)
    }

    fn stored_hash(&self) -> &str {
        &self.hash
    }

    fn transactions(&self) -> Option<&[Transaction]> {
        None
    }
}

/// Check a single link on its own: difficulty, hash, and proof of work.
pub fn validate_link<L: ChainLink>(
    link: &L,
    difficulty: u32,
    mode: ValidationMode,
) -> Result<(), ChainError> {
    let index = link.index();
    let mut header = link.header();

    if header.difficulty != difficulty {
        return Err(ChainError::DifficultyMismatch {
            index,
            expected: difficulty,
            found: header.difficulty,
        });
    }

    let stored_root = header.merkle_root.clone();
    if mode == ValidationMode::Full {
        let txs = link
            .transactions()
            .ok_or(ChainError::MissingBody { index })?;
        header.merkle_root = merkle_root(txs);
    }
    if hash_header(&header) != link.stored_hash() {
        return Err(ChainError::HashMismatch { index });
    }
    if header.merkle_root != stored_root {
        return Err(ChainError::MerkleMismatch { index });
    }

    if !meets_difficulty(link.stored_hash(), difficulty) {
        return Err(ChainError::ProofOfWorkInvalid { index });
    }
    Ok(())
}

/// Validate an oldest-to-newest sequence. Any failure rejects the whole
/// sequence. The first element must carry index 1 and link to [`ZERO_HASH`].
pub fn validate_sequence<L: ChainLink>(
    links: &[L],
    difficulty: u32,
    mode: ValidationMode,
) -> Result<(), ChainError> {
    let mut prior: Option<&L> = None;
    for link in links {
        validate_link(link, difficulty, mode)?;

        let index = link.index();
        let expected = prior.map_or(1, |p| p.index() + 1);
        let expected_prev = prior.map_or(ZERO_HASH, |p| p.stored_hash());
        if link.header().previous_hash != expected_prev {
            return Err(ChainError::LinkageMismatch { index });
        }
        if index != expected {
            return Err(ChainError::IndexMismatch { index, expected });
        }
        prior = Some(link);
    }
    Ok(())
}

pub fn validate_chain(blocks: &[Block], difficulty: u32) -> Result<(), ChainError> {
    validate_sequence(blocks, difficulty, ValidationMode::Full)
}

pub fn validate_headers(headers: &[HeaderRecord], difficulty: u32) -> Result<(), ChainError> {
    validate_sequence(headers, difficulty, ValidationMode::HeadersOnly)
}

/// Check that `block` is a valid successor of `tip` (or a valid genesis when
/// `tip` is `None`).
pub fn validate_successor(
    block: &Block,
    tip: Option<&Block>,
    difficulty: u32,
) -> Result<(), ChainError> {
    validate_link(block, difficulty, ValidationMode::Full)?;
    match tip {
        Some(tip) => {
            if block.previous_hash != tip.hash {
                return Err(ChainError::LinkageMismatch { index: block.index });
            }
            if block.index != tip.index + 1 {
                return Err(ChainError::IndexMismatch {
                    index: block.index,
                    expected: tip.index + 1,
                });
            }
        }
        None => {
            if block.previous_hash != ZERO_HASH {
                return Err(ChainError::LinkageMismatch { index: block.index });
            }
            if block.index != 1 {
                return Err(ChainError::IndexMismatch {
                    index: block.index,
                    expected: 1,
                });
            }
        }
    }
    Ok(())
}
