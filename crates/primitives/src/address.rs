//! Dogecoin Base58Check addresses and standard script templates.

use std::fmt;

use crate::base58::{base58_decode_check, base58_encode_check, Base58Error};
use crate::hash::hash160;
use crate::network::Network;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    Base58(Base58Error),
    InvalidLength,
    UnknownPrefix(u8),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Base58(err) => write!(f, "{err}"),
            AddressError::InvalidLength => write!(f, "address payload must be 21 bytes"),
            AddressError::UnknownPrefix(prefix) => {
                write!(f, "unknown address version byte 0x{prefix:02x}")
            }
        }
    }
}

impl std::error::Error for AddressError {}

impl From<Base58Error> for AddressError {
    fn from(err: Base58Error) -> Self {
        AddressError::Base58(err)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressKind {
    PubkeyHash,
    ScriptHash,
}

/// A Base58Check address string. Construction does not validate; use
/// [`Address::decode`] for that.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_pubkey_hash(hash: &[u8; 20], network: Network) -> Self {
        Self(encode_versioned(network.pubkey_hash_prefix(), hash))
    }

    pub fn from_script_hash(hash: &[u8; 20], network: Network) -> Self {
        Self(encode_versioned(network.script_hash_prefix(), hash))
    }

    pub fn from_pubkey(pubkey: &[u8], network: Network) -> Self {
        Self::from_pubkey_hash(&hash160(pubkey), network)
    }

    pub fn decode(&self, network: Network) -> Result<(AddressKind, [u8; 20]), AddressError> {
        let payload = base58_decode_check(&self.0)?;
        if payload.len() != 21 {
            return Err(AddressError::InvalidLength);
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        let version = payload[0];
        if version == network.pubkey_hash_prefix() {
            Ok((AddressKind::PubkeyHash, hash))
        } else if version == network.script_hash_prefix() {
            Ok((AddressKind::ScriptHash, hash))
        } else {
            Err(AddressError::UnknownPrefix(version))
        }
    }

    pub fn is_valid(&self, network: Network) -> bool {
        self.decode(network).is_ok()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn p2pkh_address(pubkey_hash: &[u8; 20], network: Network) -> Address {
    Address::from_pubkey_hash(pubkey_hash, network)
}

fn encode_versioned(version: u8, hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(version);
    payload.extend_from_slice(hash);
    base58_encode_check(&payload)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pkh,
    P2Sh,
    P2Pk,
    NullData,
    Unknown,
}

impl ScriptType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptType::P2Pkh => "p2pkh",
            ScriptType::P2Sh => "p2sh",
            ScriptType::P2Pk => "p2pk",
            ScriptType::NullData => "nulldata",
            ScriptType::Unknown => "nonstandard",
        }
    }
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if p2pk_pubkey(script).is_some() {
        ScriptType::P2Pk
    } else if script.first() == Some(&0x6a) {
        ScriptType::NullData
    } else {
        ScriptType::Unknown
    }
}

/// Address paid by a standard output script. Pay-to-pubkey outputs map to
/// the P2PKH address of the same key.
pub fn script_pubkey_to_address(script: &[u8], network: Network) -> Option<Address> {
    match classify_script_pubkey(script) {
        ScriptType::P2Pkh => {
            let hash: [u8; 20] = script[3..23].try_into().ok()?;
            Some(Address::from_pubkey_hash(&hash, network))
        }
        ScriptType::P2Sh => {
            let hash: [u8; 20] = script[2..22].try_into().ok()?;
            Some(Address::from_script_hash(&hash, network))
        }
        ScriptType::P2Pk => p2pk_pubkey(script).map(|pubkey| Address::from_pubkey(pubkey, network)),
        ScriptType::NullData | ScriptType::Unknown => None,
    }
}

pub fn address_to_script_pubkey(
    address: &Address,
    network: Network,
) -> Result<Vec<u8>, AddressError> {
    let (kind, hash) = address.decode(network)?;
    let script = match kind {
        AddressKind::PubkeyHash => {
            let mut script = Vec::with_capacity(25);
            script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
            script.extend_from_slice(&hash);
            script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            script
        }
        AddressKind::ScriptHash => {
            let mut script = Vec::with_capacity(23);
            script.extend_from_slice(&[OP_HASH160, 0x14]);
            script.extend_from_slice(&hash);
            script.push(OP_EQUAL);
            script
        }
    };
    Ok(script)
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn p2pk_pubkey(script: &[u8]) -> Option<&[u8]> {
    let key_len = match script.first().copied() {
        Some(33) => 33usize,
        Some(65) => 65usize,
        _ => return None,
    };
    if script.len() != key_len + 2 || script[key_len + 1] != OP_CHECKSIG {
        return None;
    }
    script.get(1..=key_len)
}
