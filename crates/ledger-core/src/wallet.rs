//! secp256k1 key handling, address derivation and transaction signing.
//!
//! Public keys travel as hex of the raw 64-byte `x || y` point (SEC1 33/65-byte
//! encodings are accepted too) and signatures as hex of the 64-byte `r || s`
//! form. The signed digest is `SHA1(SHA256(canonical transaction encoding))`,
//! which is what python-ecdsa wallets produce when they sign the SHA-256
//! digest with their default hash. Plain ECDSA/SHA-256 signatures over the
//! canonical bytes are still accepted on verification.

use crate::codec::{canonical_tx_bytes, sha256_hex};
use crate::constants::ADDRESS_HEX_SIZE;
use crate::{SignedTransaction, Transaction};
use anyhow::{Context, Result};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::signature::Verifier;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        let bytes = hex::decode(secret.trim()).context("secret key is not hex")?;
        let signing = SigningKey::from_slice(&bytes).context("invalid secp256k1 secret key")?;
        Ok(Self { signing })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Raw `x || y` public point, hex encoded.
    pub fn public_hex(&self) -> String {
        let point = self.signing.verifying_key().to_encoded_point(false);
        hex::encode(&point.as_bytes()[1..])
    }

    pub fn address(&self) -> String {
        let point = self.signing.verifying_key().to_encoded_point(false);
        address_from_public_key_bytes(&point.as_bytes()[1..])
    }

    pub fn sign(&self, tx: &Transaction) -> Result<String> {
        let signature: Signature = self
            .signing
            .sign_prehash(&signing_digest(tx))
            .context("signing transaction digest")?;
        Ok(hex::encode(signature.to_bytes()))
    }

    pub fn sign_transaction(&self, tx: Transaction) -> Result<SignedTransaction> {
        Ok(SignedTransaction {
            signature: self.sign(&tx)?,
            public_key: Some(self.public_hex()),
            transaction: tx,
        })
    }
}

/// `SHA1(SHA256(canonical bytes))`
fn signing_digest(tx: &Transaction) -> Vec<u8> {
    let message_hash = Sha256::digest(canonical_tx_bytes(tx));
    Sha1::digest(message_hash).to_vec()
}

/// `SHA256(public key bytes)` truncated to 40 hex characters.
pub fn address_from_public_key_bytes(public_key: &[u8]) -> String {
    let mut digest = sha256_hex(public_key);
    digest.truncate(ADDRESS_HEX_SIZE);
    digest
}

pub fn address_from_public_key(public_key_hex: &str) -> Option<String> {
    hex::decode(public_key_hex)
        .ok()
        .map(|bytes| address_from_public_key_bytes(&bytes))
}

pub fn parse_public_key(public_key_hex: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(public_key_hex).ok()?;
    match bytes.len() {
        64 => {
            let mut sec1 = Vec::with_capacity(65);
            sec1.push(0x04);
            sec1.extend_from_slice(&bytes);
            VerifyingKey::from_sec1_bytes(&sec1).ok()
        }
        _ => VerifyingKey::from_sec1_bytes(&bytes).ok(),
    }
}

/// True when `signature_hex` is a valid signature by `public_key_hex` over
/// the canonical encoding of `tx`. Malformed input is simply invalid.
pub fn verify_signature(public_key_hex: &str, signature_hex: &str, tx: &Transaction) -> bool {
    let Some(key) = parse_public_key(public_key_hex) else {
        return false;
    };
    let Ok(bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let signature = match Signature::from_slice(&bytes).or_else(|_| Signature::from_der(&bytes)) {
        Ok(sig) => sig.normalize_s().unwrap_or(sig),
        Err(_) => return false,
    };
    key.verify_prehash(&signing_digest(tx), &signature).is_ok()
        || key.verify(&canonical_tx_bytes(tx), &signature).is_ok()
}
