use std::fmt;

use dogeledger_primitives::encoding::{decode, Decodable};
use dogeledger_primitives::AddressError;
use dogeledger_storage::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    NotFound(&'static str, String),
    AlreadyExists(&'static str, String),
    Validation(String),
    Address(AddressError),
    Store(StoreError),
    Corrupt(&'static str),
    /// The transaction was already committed or rolled back.
    Closed,
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(..))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, LedgerError::AlreadyExists(..))
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::NotFound(kind, key) => write!(f, "{kind} not found: {key}"),
            LedgerError::AlreadyExists(kind, key) => write!(f, "{kind} already exists: {key}"),
            LedgerError::Validation(message) => write!(f, "validation failed: {message}"),
            LedgerError::Address(err) => write!(f, "{err}"),
            LedgerError::Store(err) => write!(f, "{err}"),
            LedgerError::Corrupt(what) => write!(f, "corrupt {what} record"),
            LedgerError::Closed => write!(f, "transaction is closed"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::Store(err)
    }
}

impl From<AddressError> for LedgerError {
    fn from(err: AddressError) -> Self {
        LedgerError::Address(err)
    }
}

pub(crate) fn decode_record<T: Decodable>(
    bytes: &[u8],
    what: &'static str,
) -> Result<T, LedgerError> {
    decode(bytes).map_err(|_| LedgerError::Corrupt(what))
}
