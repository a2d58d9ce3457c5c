//! Transaction output reference.

use std::fmt;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::{hash256_to_hex, Hash256};

pub const OUTPOINT_KEY_LEN: usize = 36;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// Fixed-width storage key: txid bytes then big-endian vout.
    pub fn key(&self) -> [u8; OUTPOINT_KEY_LEN] {
        let mut out = [0u8; OUTPOINT_KEY_LEN];
        out[..32].copy_from_slice(&self.txid);
        out[32..].copy_from_slice(&self.vout.to_be_bytes());
        out
    }

    pub fn from_key(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != OUTPOINT_KEY_LEN {
            return None;
        }
        let txid: Hash256 = bytes[..32].try_into().ok()?;
        let vout = u32::from_be_bytes(bytes[32..].try_into().ok()?);
        Some(Self { txid, vout })
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hash256_to_hex(&self.txid), self.vout)
    }
}

impl Encodable for OutPoint {
    fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.txid);
        encoder.write_u32_le(self.vout);
    }
}

impl Decodable for OutPoint {
    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let txid = decoder.read_hash()?;
        let vout = decoder.read_u32_le()?;
        Ok(Self { txid, vout })
    }
}
