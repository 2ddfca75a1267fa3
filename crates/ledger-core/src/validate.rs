use crate::error::TxError;
use crate::wallet::{address_from_public_key, verify_signature};
use crate::{Block, SignedTransaction, Transaction};

/// Source of confirmed (on-chain) balances.
pub trait BalanceSource {
    fn confirmed_balance(&self, address: &str) -> f64;
}

/// Full scan over every confirmed transaction.
impl BalanceSource for [Block] {
    fn confirmed_balance(&self, address: &str) -> f64 {
        self.iter()
            .flat_map(|b| b.transactions.iter())
            .fold(0.0, |balance, tx| apply(balance, tx, address))
    }
}

impl BalanceSource for Vec<Block> {
    fn confirmed_balance(&self, address: &str) -> f64 {
        self.as_slice().confirmed_balance(address)
    }
}

pub(crate) fn apply(mut balance: f64, tx: &Transaction, address: &str) -> f64 {
    if tx.receiver == address {
        balance += tx.amount;
    }
    if tx.sender == address {
        balance -= tx.amount;
    }
    balance
}

/// Confirmed balance adjusted by the not-yet-mined transactions in `pending`.
pub fn available_balance<B: BalanceSource + ?Sized>(
    address: &str,
    balances: &B,
    pending: &[Transaction],
) -> f64 {
    pending
        .iter()
        .fold(balances.confirmed_balance(address), |balance, tx| {
            apply(balance, tx, address)
        })
}

/// Admission check for a signed transaction. Checks run in a fixed order and
/// stop at the first failure; coinbase transactions skip ownership, signature
/// and balance checks.
pub fn validate<B: BalanceSource + ?Sized>(
    signed: &SignedTransaction,
    balances: &B,
    pending: &[Transaction],
) -> Result<(), TxError> {
    let tx = &signed.transaction;

    if tx.sender.is_empty() {
        return Err(TxError::MissingField { field: "sender" });
    }
    if tx.receiver.is_empty() {
        return Err(TxError::MissingField { field: "receiver" });
    }
    // NaN fails this comparison too.
    if !(tx.amount > 0.0) {
        return Err(TxError::NonPositiveAmount);
    }
    if tx.is_coinbase() {
        return Ok(());
    }

    let public_key = signed.public_key.as_deref().ok_or(TxError::AddressMismatch)?;
    match address_from_public_key(public_key) {
        Some(derived) if derived == tx.sender => {}
        _ => return Err(TxError::AddressMismatch),
    }

    if !verify_signature(public_key, &signed.signature, tx) {
        return Err(TxError::InvalidSignature);
    }

    let available = available_balance(&tx.sender, balances, pending);
    if tx.amount > available {
        return Err(TxError::InsufficientFunds {
            available,
            required: tx.amount,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SYSTEM_ADDRESS;
    use crate::wallet::Keypair;
    use std::collections::HashMap;

    struct Fixed(HashMap<String, f64>);

    impl BalanceSource for Fixed {
        fn confirmed_balance(&self, address: &str) -> f64 {
            self.0.get(address).copied().unwrap_or(0.0)
        }
    }

    fn funded(address: &str, amount: f64) -> Fixed {
        Fixed(HashMap::from([(address.to_string(), amount)]))
    }

    fn transfer(keys: &Keypair, to: &str, amount: f64) -> SignedTransaction {
        keys.sign_transaction(Transaction::new(keys.address(), to, amount)).unwrap()
    }

    #[test]
    fn accepts_funded_signed_transfer() {
        let alice = Keypair::generate();
        let signed = transfer(&alice, "bob", 40.0);
        assert_eq!(validate(&signed, &funded(&alice.address(), 100.0), &[]), Ok(()));
    }

    #[test]
    fn missing_fields_checked_first() {
        let alice = Keypair::generate();
        let mut signed = transfer(&alice, "", -1.0);
        assert_eq!(
            validate(&signed, &funded("x", 0.0), &[]),
            Err(TxError::MissingField { field: "receiver" })
        );
        signed.transaction.sender.clear();
        assert_eq!(
            validate(&signed, &funded("x", 0.0), &[]),
            Err(TxError::MissingField { field: "sender" })
        );
    }

    #[test]
    fn non_positive_amounts_rejected() {
        let alice = Keypair::generate();
        for amount in [0.0, -5.0, f64::NAN] {
            let signed = transfer(&alice, "bob", amount);
            assert_eq!(
                validate(&signed, &funded(&alice.address(), 100.0), &[]),
                Err(TxError::NonPositiveAmount)
            );
        }
    }

    #[test]
    fn coinbase_skips_remaining_checks() {
        let signed = SignedTransaction {
            transaction: Transaction::new(SYSTEM_ADDRESS, "miner", 1_000_000.0),
            signature: "dummy_signature".to_string(),
            public_key: None,
        };
        assert_eq!(validate(&signed, &funded("x", 0.0), &[]), Ok(()));
    }

    #[test]
    fn key_must_own_sender_address() {
        let alice = Keypair::generate();
        let mallory = Keypair::generate();
        let mut signed = transfer(&alice, "bob", 1.0);
        signed.public_key = Some(mallory.public_hex());
        let balances = funded(&alice.address(), 100.0);
        assert_eq!(validate(&signed, &balances, &[]), Err(TxError::AddressMismatch));

        signed.public_key = None;
        assert_eq!(validate(&signed, &balances, &[]), Err(TxError::AddressMismatch));

        signed.public_key = Some("not hex".to_string());
        assert_eq!(validate(&signed, &balances, &[]), Err(TxError::AddressMismatch));
    }

    #[test]
    fn invalid_signature_rejected_regardless_of_balance() {
        let alice = Keypair::generate();
        let mut signed = transfer(&alice, "bob", 1.0);
        signed.signature = alice
            .sign(&Transaction::new(alice.address(), "carol", 1.0))
            .unwrap();
        for balance in [0.0, 1_000_000.0] {
            assert_eq!(
                validate(&signed, &funded(&alice.address(), balance), &[]),
                Err(TxError::InvalidSignature)
            );
        }
    }

    #[test]
    fn pending_outgoing_counts_against_balance() {
        let alice = Keypair::generate();
        let pending = vec![Transaction::new(alice.address(), "carol", 95.0)];
        let signed = transfer(&alice, "bob", 10.0);
        match validate(&signed, &funded(&alice.address(), 100.0), &pending) {
            Err(TxError::InsufficientFunds { available, required }) => {
                assert_eq!(available, 5.0);
                assert_eq!(required, 10.0);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[test]
    fn pending_incoming_counts_toward_balance() {
        let alice = Keypair::generate();
        let pending = vec![Transaction::new("dave", alice.address(), 50.0)];
        let signed = transfer(&alice, "bob", 60.0);
        assert_eq!(validate(&signed, &funded(&alice.address(), 20.0), &pending), Ok(()));
    }

    #[test]
    fn exact_balance_is_spendable() {
        let alice = Keypair::generate();
        let signed = transfer(&alice, "bob", 25.0);
        assert_eq!(validate(&signed, &funded(&alice.address(), 25.0), &[]), Ok(()));
    }

    #[test]
    fn block_slice_balance_is_received_minus_sent() {
        let block = Block {
            index: 1,
            transactions: vec![
                Transaction::new(SYSTEM_ADDRESS, "a", 100.0),
                Transaction::new("a", "b", 30.0),
                Transaction::new("b", "a", 5.0),
            ],
            previous_hash: String::new(),
            merkle_root: String::new(),
            timestamp: 0.0,
            nonce: 0,
            difficulty: 0,
            hash: String::new(),
        };
        let chain = vec![block];
        assert_eq!(chain.confirmed_balance("a"), 75.0);
        assert_eq!(chain.confirmed_balance("b"), 25.0);
        assert_eq!(chain.confirmed_balance("nobody"), 0.0);
    }
}
