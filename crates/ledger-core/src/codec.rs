//! Canonical byte encodings and SHA-256 hashing of transactions and headers.
//!
//! The encodings are part of the wire contract: a transaction hashes (and is
//! signed) as its key-sorted JSON object with `", "` / `": "` separators, and a
//! header hashes as the plain concatenation of its five fields. Floats render as
//! the shortest round-trip decimal, always carrying a fraction or an exponent.

use crate::{BlockHeader, Transaction};
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io;

pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Field order here is the key order of the encoding.
#[derive(Serialize)]
struct SortedTx<'a> {
    amount: f64,
    receiver: &'a str,
    sender: &'a str,
    timestamp: f64,
}

/// JSON with `", "` / `": "` separators, ASCII-only strings and
/// [`format_float`] numbers.
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(format_float(value).as_bytes())
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for c in fragment.chars() {
            if (' '..='~').contains(&c) {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

pub fn canonical_tx_bytes(tx: &Transaction) -> Vec<u8> {
    let sorted = SortedTx {
        amount: tx.amount,
        receiver: &tx.receiver,
        sender: &tx.sender,
        timestamp: tx.timestamp,
    };
    let mut out = Vec::with_capacity(96 + tx.sender.len() + tx.receiver.len());
    let mut ser = Serializer::with_formatter(&mut out, CanonicalFormatter);
    sorted
        .serialize(&mut ser)
        .expect("writing a transaction into a Vec cannot fail");
    out
}

pub fn hash_transaction(tx: &Transaction) -> String {
    sha256_hex(canonical_tx_bytes(tx))
}

/// The nonce-independent head of the header preimage.
pub fn header_prefix(header: &BlockHeader) -> String {
    format!(
        "{}{}{}",
        header.previous_hash,
        header.merkle_root,
        format_float(header.timestamp)
    )
}

/// `prefix || nonce || difficulty`
pub fn header_preimage(header: &BlockHeader) -> String {
    format!(
        "{}{}{}",
        header_prefix(header),
        header.nonce,
        header.difficulty
    )
}

pub fn hash_header(header: &BlockHeader) -> String {
    sha256_hex(header_preimage(header))
}

pub fn leading_hex_zeros(hash: &str) -> u32 {
    hash.bytes().take_while(|b| *b == b'0').count() as u32
}

pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    leading_hex_zeros(hash) >= difficulty
}

/// Shortest round-trip rendering: fixed notation for exponents in `-4..16`,
/// otherwise `d.ddde+XX`. Integral values keep a trailing `.0`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let sci = format!("{value:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(m) => (true, m),
        None => (false, mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let mut out = String::with_capacity(digits.len() + 8);
    if negative {
        out.push('-');
    }
    if (-4..16).contains(&exp) {
        if exp < 0 {
            out.push_str("0.");
            out.extend(std::iter::repeat_n('0', (-exp - 1) as usize));
            out.push_str(&digits);
        } else {
            let int_len = exp as usize + 1;
            if digits.len() <= int_len {
                out.push_str(&digits);
                out.extend(std::iter::repeat_n('0', int_len - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exp < 0 { '-' } else { '+' };
        let _ = write!(out, "e{sign}{:02}", exp.abs());
    }
    out
}
