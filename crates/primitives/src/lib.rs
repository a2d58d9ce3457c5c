//! Hashing, binary encoding, Base58Check and Dogecoin address primitives.

pub mod address;
pub mod amount;
pub mod base58;
pub mod encoding;
pub mod hash;
pub mod network;
pub mod outpoint;

pub use address::{
    address_to_script_pubkey, classify_script_pubkey, p2pkh_address, script_pubkey_to_address,
    Address, AddressError, AddressKind, ScriptType,
};
pub use amount::{format_coins, CoinAmount, COIN};
pub use base58::{
    base58_decode, base58_decode_check, base58_encode, base58_encode_check, Base58Error,
};
pub use hash::{hash160, hash256_from_hex, hash256_to_hex, sha256, sha256d, Hash256, HexError};
pub use network::Network;
pub use outpoint::OutPoint;
