//! Column-oriented key-value storage trait with memory and fjall backends.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod memory;
pub mod overlay;

#[cfg(feature = "fjall")]
pub mod fjall;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Column {
    /// foreign id -> account record
    Account,
    /// account id -> foreign id
    AccountId,
    /// address -> owning account, key index, internal flag
    Address,
    /// account prefix + internal flag + key index -> address
    AccountAddress,
    /// invoice id (address) -> invoice record
    Invoice,
    /// account prefix + sequence -> invoice id
    AccountInvoice,
    /// invoice id with received but unsettled outputs
    InvoiceAwaiting,
    /// outpoint -> utxo record
    Utxo,
    /// account prefix + outpoint
    AccountUtxo,
    /// created height + outpoint, for unconfirmed outputs
    PendingUtxo,
    /// txid -> outgoing transaction record
    Txn,
    /// account prefix + txid
    AccountTxn,
    /// address prefix + height
    AddressBlock,
    /// account id -> highest height cleared by a rollback
    RollbackMark,
    Meta,
}

impl Column {
    pub const ALL: [Column; 15] = [
        Column::Account,
        Column::AccountId,
        Column::Address,
        Column::AccountAddress,
        Column::Invoice,
        Column::AccountInvoice,
        Column::InvoiceAwaiting,
        Column::Utxo,
        Column::AccountUtxo,
        Column::PendingUtxo,
        Column::Txn,
        Column::AccountTxn,
        Column::AddressBlock,
        Column::RollbackMark,
        Column::Meta,
    ];

    pub const fn bit(self) -> u32 {
        1 << self.index()
    }

    pub const fn index(self) -> usize {
        match self {
            Column::Account => 0,
            Column::AccountId => 1,
            Column::Address => 2,
            Column::AccountAddress => 3,
            Column::Invoice => 4,
            Column::AccountInvoice => 5,
            Column::InvoiceAwaiting => 6,
            Column::Utxo => 7,
            Column::AccountUtxo => 8,
            Column::PendingUtxo => 9,
            Column::Txn => 10,
            Column::AccountTxn => 11,
            Column::AddressBlock => 12,
            Column::RollbackMark => 13,
            Column::Meta => 14,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::Account => "account",
            Column::AccountId => "account_id",
            Column::Address => "address",
            Column::AccountAddress => "account_address",
            Column::Invoice => "invoice",
            Column::AccountInvoice => "account_invoice",
            Column::InvoiceAwaiting => "invoice_awaiting",
            Column::Utxo => "utxo",
            Column::AccountUtxo => "account_utxo",
            Column::PendingUtxo => "pending_utxo",
            Column::Txn => "txn",
            Column::AccountTxn => "account_txn",
            Column::AddressBlock => "address_block",
            Column::RollbackMark => "rollback_mark",
            Column::Meta => "meta",
        }
    }
}

#[derive(Clone, Debug)]
pub struct WriteKey(SmallVec<[u8; 64]>);

impl WriteKey {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl AsRef<[u8]> for WriteKey {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for WriteKey {
    fn from(value: Vec<u8>) -> Self {
        Self(SmallVec::from_vec(value))
    }
}

impl From<&[u8]> for WriteKey {
    fn from(value: &[u8]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl<const N: usize> From<[u8; N]> for WriteKey {
    fn from(value: [u8; N]) -> Self {
        Self(SmallVec::from_slice(&value))
    }
}

impl<const N: usize> From<&[u8; N]> for WriteKey {
    fn from(value: &[u8; N]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

#[derive(Clone, Debug)]
pub struct WriteValue(SmallVec<[u8; 64]>);

impl WriteValue {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl AsRef<[u8]> for WriteValue {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for WriteValue {
    fn from(value: Vec<u8>) -> Self {
        Self(SmallVec::from_vec(value))
    }
}

impl From<&[u8]> for WriteValue {
    fn from(value: &[u8]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl<const N: usize> From<[u8; N]> for WriteValue {
    fn from(value: [u8; N]) -> Self {
        Self(SmallVec::from_slice(&value))
    }
}

impl<const N: usize> From<&[u8; N]> for WriteValue {
    fn from(value: &[u8; N]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        column: Column,
        key: WriteKey,
        value: WriteValue,
    },
    Delete {
        column: Column,
        key: WriteKey,
    },
}

#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: impl Into<WriteKey>, value: impl Into<WriteValue>) {
        self.ops.push(WriteOp::Put {
            column,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl Into<WriteKey>) {
        self.ops.push(WriteOp::Delete {
            column,
            key: key.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Bitmask of [`Column::bit`] for every column the batch writes.
    pub fn touched_columns(&self) -> u32 {
        self.ops.iter().fold(0, |mask, op| match op {
            WriteOp::Put { column, .. } | WriteOp::Delete { column, .. } => mask | column.bit(),
        })
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;
pub type PrefixVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError> + 'a;

/// Backends must return `scan_prefix` results in ascending key order and
/// apply `write_batch` atomically.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError>;
    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError>;
    /// At most `limit` rows under `prefix` whose keys are `>= start`.
    fn scan_prefix_from(
        &self,
        column: Column,
        prefix: &[u8],
        start: &[u8],
        limit: usize,
    ) -> Result<ScanResult, StoreError>;
    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError>;
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;
}

macro_rules! forward_key_value_store {
    ($($wrapper:ty),*) => {$(
        impl<T: KeyValueStore + ?Sized> KeyValueStore for $wrapper {
            fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
                (**self).get(column, key)
            }

            fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
                (**self).put(column, key, value)
            }

            fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
                (**self).delete(column, key)
            }

            fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
                (**self).scan_prefix(column, prefix)
            }

            fn scan_prefix_from(
                &self,
                column: Column,
                prefix: &[u8],
                start: &[u8],
                limit: usize,
            ) -> Result<ScanResult, StoreError> {
                (**self).scan_prefix_from(column, prefix, start, limit)
            }

            fn for_each_prefix<'a>(
                &self,
                column: Column,
                prefix: &[u8],
                visitor: &mut PrefixVisitor<'a>,
            ) -> Result<(), StoreError> {
                (**self).for_each_prefix(column, prefix, visitor)
            }

            fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
                (**self).write_batch(batch)
            }
        }
    )*};
}

forward_key_value_store!(Arc<T>, &T);
