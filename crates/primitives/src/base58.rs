//! Base58 and Base58Check codecs (Bitcoin alphabet).

use crate::hash::sha256d;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base58Error {
    /// Check-decoded payload shorter than the checksum.
    InvalidLength,
    /// Character outside the base-58 alphabet.
    InvalidCharacter { position: usize, byte: u8 },
    InvalidChecksum,
}

impl std::fmt::Display for Base58Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Base58Error::InvalidLength => write!(f, "base58 payload too short for checksum"),
            Base58Error::InvalidCharacter { position, byte } => write!(
                f,
                "invalid base58 character {:?} at position {position}",
                *byte as char
            ),
            Base58Error::InvalidChecksum => write!(f, "base58 checksum mismatch"),
        }
    }
}

impl std::error::Error for Base58Error {}

pub fn base58_encode(data: &[u8]) -> String {
    let leading_zeros = data.iter().take_while(|byte| **byte == 0).count();
    // Little-endian base-58 digits of the non-zero tail.
    let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 138 / 100 + 1);
    for byte in &data[leading_zeros..] {
        let mut carry = u32::from(*byte);
        for digit in digits.iter_mut() {
            let value = u32::from(*digit) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    let mut out = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        out.push('1');
    }
    for digit in digits.iter().rev() {
        out.push(ALPHABET[*digit as usize] as char);
    }
    out
}

pub fn base58_decode(input: &str) -> Result<Vec<u8>, Base58Error> {
    let raw = input.as_bytes();
    let leading_ones = raw.iter().take_while(|byte| **byte == b'1').count();
    // Little-endian base-256 bytes of the tail.
    let mut bytes: Vec<u8> = Vec::with_capacity(raw.len() * 733 / 1000 + 1);
    for (position, ch) in raw.iter().enumerate().skip(leading_ones) {
        let value = base58_value(*ch).ok_or(Base58Error::InvalidCharacter {
            position,
            byte: *ch,
        })?;
        let mut carry = u32::from(value);
        for byte in bytes.iter_mut() {
            let acc = u32::from(*byte) * 58 + carry;
            *byte = (acc & 0xff) as u8;
            carry = acc >> 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let mut out = vec![0u8; leading_ones];
    out.extend(bytes.iter().rev());
    Ok(out)
}

pub fn base58_encode_check(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + CHECKSUM_LEN);
    data.extend_from_slice(payload);
    data.extend_from_slice(&sha256d(payload)[..CHECKSUM_LEN]);
    base58_encode(&data)
}

pub fn base58_decode_check(input: &str) -> Result<Vec<u8>, Base58Error> {
    let mut bytes = base58_decode(input)?;
    if bytes.len() < CHECKSUM_LEN {
        return Err(Base58Error::InvalidLength);
    }
    let split = bytes.len() - CHECKSUM_LEN;
    let digest = sha256d(&bytes[..split]);
    if bytes[split..] != digest[..CHECKSUM_LEN] {
        return Err(Base58Error::InvalidChecksum);
    }
    bytes.truncate(split);
    Ok(bytes)
}

fn base58_value(byte: u8) -> Option<u8> {
    ALPHABET
        .iter()
        .position(|value| *value == byte)
        .map(|pos| pos as u8)
}
