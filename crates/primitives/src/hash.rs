use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::Sha256;

pub type Hash256 = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexError {
    InvalidLength,
    InvalidCharacter,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "hash hex must be 64 characters"),
            HexError::InvalidCharacter => write!(f, "invalid hex character"),
        }
    }
}

impl std::error::Error for HexError {}

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = sha256(data);
    let digest = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Parses a txid/block hash in display (byte-reversed) order.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if trimmed.len() != 64 {
        return Err(HexError::InvalidLength);
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(trimmed, &mut out).map_err(|_| HexError::InvalidCharacter)?;
    out.reverse();
    Ok(out)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut display = *hash;
    display.reverse();
    hex::encode(display)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_display_order() {
        let mut hash = [0u8; 32];
        hash[0] = 0xab;
        let text = hash256_to_hex(&hash);
        assert!(text.ends_with("ab"));
        assert_eq!(hash256_from_hex(&text), Ok(hash));
        assert_eq!(hash256_from_hex(&format!("0x{text}")), Ok(hash));
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert_eq!(hash256_from_hex("abcd"), Err(HexError::InvalidLength));
        let bad = "zz".repeat(32);
        assert_eq!(hash256_from_hex(&bad), Err(HexError::InvalidCharacter));
    }

    #[test]
    fn sha256d_of_empty() {
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }
}
