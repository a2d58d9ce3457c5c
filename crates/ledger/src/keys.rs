//! Storage key layout.
//!
//! Composite keys start with a length-prefixed owner so that a prefix scan
//! over one account never reaches into another whose id shares a prefix.
//! Heights and sequences are big-endian so keys sort numerically.

use dogeledger_primitives::outpoint::OUTPOINT_KEY_LEN;
use dogeledger_primitives::{Address, Hash256, OutPoint};

use crate::error::LedgerError;

pub const META_SCHEMA_VERSION: &[u8] = b"schema_version";
pub const META_CHAIN_STATE: &[u8] = b"chain_state";
pub const META_INVOICE_SEQ: &[u8] = b"invoice_seq";

/// Longest account id or address that fits the two-byte length prefix.
pub const MAX_OWNER_LEN: usize = u16::MAX as usize;

/// Rejects ids that cannot be keyed without colliding with another owner.
pub fn check_owner(kind: &str, owner: &Address) -> Result<(), LedgerError> {
    if owner.is_empty() {
        return Err(LedgerError::Validation(format!("{kind} is empty")));
    }
    if owner.as_str().len() > MAX_OWNER_LEN {
        return Err(LedgerError::Validation(format!(
            "{kind} is {} bytes, limit {MAX_OWNER_LEN}",
            owner.as_str().len()
        )));
    }
    Ok(())
}

/// `owner` must have passed [`check_owner`].
pub fn owner_prefix(owner: &str) -> Vec<u8> {
    let bytes = owner.as_bytes();
    let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
    let mut key = Vec::with_capacity(2 + bytes.len() + OUTPOINT_KEY_LEN);
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(&bytes[..usize::from(len)]);
    key
}

pub fn account_prefix(account: &Address) -> Vec<u8> {
    owner_prefix(account.as_str())
}

pub fn account_address_key(account: &Address, is_internal: bool, key_index: u32) -> Vec<u8> {
    let mut key = account_prefix(account);
    key.push(u8::from(is_internal));
    key.extend_from_slice(&key_index.to_be_bytes());
    key
}

pub fn account_invoice_key(account: &Address, seq: u64) -> Vec<u8> {
    let mut key = account_prefix(account);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

pub fn account_utxo_key(account: &Address, outpoint: &OutPoint) -> Vec<u8> {
    let mut key = account_prefix(account);
    key.extend_from_slice(&outpoint.key());
    key
}

pub fn account_txn_key(account: &Address, txid: &Hash256) -> Vec<u8> {
    let mut key = account_prefix(account);
    key.extend_from_slice(txid);
    key
}

/// Heights are validated non-negative before they reach a key.
pub fn pending_utxo_key(created_height: i64, outpoint: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + OUTPOINT_KEY_LEN);
    key.extend_from_slice(&(created_height as u64).to_be_bytes());
    key.extend_from_slice(&outpoint.key());
    key
}

pub fn split_pending_utxo_key(key: &[u8]) -> Option<(i64, OutPoint)> {
    if key.len() != 8 + OUTPOINT_KEY_LEN {
        return None;
    }
    let height = u64::from_be_bytes(key[..8].try_into().ok()?);
    let outpoint = OutPoint::from_key(&key[8..])?;
    Some((i64::try_from(height).ok()?, outpoint))
}

pub fn address_block_key(address: &Address, height: i64) -> Vec<u8> {
    let mut key = owner_prefix(address.as_str());
    key.extend_from_slice(&(height as u64).to_be_bytes());
    key
}

/// Trailing fixed-width suffix of a composite key.
pub fn key_suffix<const N: usize>(key: &[u8]) -> Option<[u8; N]> {
    let start = key.len().checked_sub(N)?;
    key[start..].try_into().ok()
}
