use crate::codec::{hash_transaction, sha256_hex};
use crate::constants::EMPTY_MERKLE_ROOT;
use crate::Transaction;

/// Merkle root over `txs` in array order. Leaves are transaction hashes,
/// interior nodes hash the concatenated hex of their children, and an odd
/// level duplicates its last entry.
pub fn merkle_root(txs: &[Transaction]) -> String {
    if txs.is_empty() {
        return EMPTY_MERKLE_ROOT.to_string();
    }
    let mut level: Vec<String> = txs.iter().map(hash_transaction).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            let mut joined = String::with_capacity(left.len() + right.len());
            joined.push_str(left);
            joined.push_str(right);
            next.push(sha256_hex(joined));
        }
        level = next;
    }
    level.swap_remove(0)
}
