//! Reorg reconciliation.
//!
//! Reverting records the highest cleared height per account as a rollback
//! mark, so the affected accounts can still be found after their heights are
//! gone. Marks are consumed by [`affected_accounts`].

use std::collections::{BTreeMap, BTreeSet};

use dogeledger_primitives::{Address, Hash256};
use dogeledger_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::LedgerError;
use crate::model::ChainState;
use crate::store::LedgerTransaction;
use crate::txn::TxnBook;
use crate::utxo::UtxoLedger;

pub struct RollbackMarks<S> {
    store: S,
}

impl<S> RollbackMarks<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> RollbackMarks<S> {
    pub fn get(&self, account: &Address) -> Result<Option<i64>, LedgerError> {
        match self
            .store
            .get(Column::RollbackMark, account.as_str().as_bytes())?
        {
            Some(bytes) => decode_height(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Raises each account's mark to at least the given height.
    pub fn record(&self, cleared: &BTreeMap<Address, i64>) -> Result<(), LedgerError> {
        let mut batch = WriteBatch::new();
        for (account, height) in cleared {
            let current = self.get(account)?;
            if current.is_some_and(|current| current >= *height) {
                continue;
            }
            batch.put(
                Column::RollbackMark,
                account.as_str().as_bytes(),
                height.to_le_bytes(),
            );
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }

    /// Removes and returns the accounts marked above `height`.
    pub fn take_above(&self, height: i64) -> Result<Vec<Address>, LedgerError> {
        let rows = self.store.scan_prefix(Column::RollbackMark, &[])?;
        let mut batch = WriteBatch::new();
        let mut accounts = Vec::new();
        for (key, value) in rows {
            if decode_height(&value)? <= height {
                continue;
            }
            batch.delete(Column::RollbackMark, key.as_slice());
            let account =
                String::from_utf8(key).map_err(|_| LedgerError::Corrupt("rollback mark"))?;
            accounts.push(Address::new(account));
        }
        self.store.write_batch(&batch)?;
        Ok(accounts)
    }
}

fn decode_height(bytes: &[u8]) -> Result<i64, LedgerError> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LedgerError::Corrupt("rollback mark"))?;
    Ok(i64::from_le_bytes(bytes))
}

/// Accounts with outputs or transactions dated above `height`, plus those
/// marked by a revert above it. Sorted and free of duplicates.
pub fn affected_accounts<S: KeyValueStore>(
    store: S,
    height: i64,
) -> Result<Vec<Address>, LedgerError> {
    let mut accounts: BTreeSet<Address> = BTreeSet::new();
    accounts.extend(UtxoLedger::new(&store).accounts_dated_above(height)?);
    accounts.extend(TxnBook::new(&store).accounts_dated_above(height)?);
    accounts.extend(RollbackMarks::new(&store).take_above(height)?);
    Ok(accounts.into_iter().collect())
}

/// Rewinds the ledger to `max_valid_height` and moves the checkpoint there.
/// Returns the accounts whose chain sequence was bumped.
pub fn rollback_to<S: KeyValueStore>(
    tx: &mut LedgerTransaction<'_, S>,
    max_valid_height: i64,
    best_block_hash: Hash256,
) -> Result<Vec<Address>, LedgerError> {
    tx.revert_utxos_above_height(max_valid_height)?;
    tx.revert_txns_above_height(max_valid_height)?;
    let accounts = tx.inc_accounts_affected_by_rollback(max_valid_height)?;
    tx.update_chain_state(&ChainState {
        best_block_hash,
        best_block_height: max_valid_height,
    })?;
    dogeledger_log::log_info!(
        "rolled back to height {max_valid_height}; {} account(s) affected",
        accounts.len()
    );
    Ok(accounts)
}
