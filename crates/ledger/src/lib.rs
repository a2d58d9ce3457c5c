//! Wallet ledger: accounts, derived addresses, UTXOs, invoices, outgoing
//! transactions and reorg reconciliation over a key-value store.

pub mod accounts;
pub mod address_index;
pub mod error;
pub mod invoice;
pub mod keys;
pub mod model;
pub mod reorg;
pub mod store;
pub mod sync;
pub mod txn;
pub mod utxo;

pub use error::LedgerError;
pub use invoice::InvoicePage;
pub use model::{
    Account, AccountBalance, AddressBlock, AddressRecord, ChainState, Invoice, InvoiceStatus,
    LineItem, Txn, TxnStatus, Utxo, UtxoStatus,
};
pub use store::{LedgerStore, LedgerTransaction, SCHEMA_VERSION};
pub use sync::{
    BlockReport, BlockTx, BlockTxOut, ChainBlock, ChainEvent, ChainFollower, FollowerReport,
};
pub use utxo::NewUtxo;
