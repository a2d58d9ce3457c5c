//! Outgoing transactions and their on-chain confirmation.

use std::collections::BTreeMap;

use dogeledger_primitives::encoding::encode;
use dogeledger_primitives::{hash256_to_hex, Address, Hash256};
use dogeledger_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::{decode_record, LedgerError};
use crate::keys::{account_prefix, account_txn_key, key_suffix};
use crate::model::Txn;
use crate::utxo::UtxoLedger;

pub struct TxnBook<S> {
    store: S,
}

impl<S> TxnBook<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> TxnBook<S> {
    pub fn get(&self, txid: &Hash256) -> Result<Option<Txn>, LedgerError> {
        match self.store.get(Column::Txn, txid)? {
            Some(bytes) => Ok(Some(decode_record(&bytes, "txn")?)),
            None => Ok(None),
        }
    }

    /// Records an unsent payment and reserves its inputs, which must be
    /// spendable outputs of the same account.
    pub fn create(&self, txn: &Txn) -> Result<(), LedgerError> {
        if self.get(&txn.id)?.is_some() {
            return Err(LedgerError::AlreadyExists("txn", hash256_to_hex(&txn.id)));
        }
        if txn.inputs.is_empty() {
            return Err(LedgerError::Validation(format!(
                "txn {} has no inputs",
                txn.id_hex()
            )));
        }
        let utxos = UtxoLedger::new(&self.store);
        for input in &txn.inputs {
            let utxo = utxos
                .get(input)?
                .ok_or_else(|| LedgerError::NotFound("utxo", input.to_string()))?;
            if utxo.account != txn.account {
                return Err(LedgerError::Validation(format!(
                    "utxo {input} does not belong to {}",
                    txn.account
                )));
            }
            utxos.reserve(input, &txn.id)?;
        }
        let record = Txn {
            on_chain_height: None,
            confirmed_height: None,
            ..txn.clone()
        };
        let mut batch = WriteBatch::new();
        self.put(&mut batch, &record);
        batch.put(
            Column::AccountTxn,
            account_txn_key(&txn.account, &txn.id),
            [],
        );
        self.store.write_batch(&batch)?;
        Ok(())
    }

    /// `None` when `txid` is not one of ours.
    pub fn mark_on_chain(&self, txid: &Hash256, height: i64) -> Result<Option<Txn>, LedgerError> {
        let Some(mut txn) = self.get(txid)? else {
            return Ok(None);
        };
        if txn.on_chain_height != Some(height) {
            txn.on_chain_height = Some(height);
            txn.confirmed_height = None;
            let mut batch = WriteBatch::new();
            self.put(&mut batch, &txn);
            self.store.write_batch(&batch)?;
        }
        Ok(Some(txn))
    }

    pub fn confirm(&self, confirmations: u32, block_height: i64) -> Result<Vec<Txn>, LedgerError> {
        let confirmations = i64::from(confirmations);
        let rows = self.store.scan_prefix(Column::Txn, &[])?;
        let mut batch = WriteBatch::new();
        let mut confirmed = Vec::new();
        for (_, bytes) in rows {
            let mut txn: Txn = decode_record(&bytes, "txn")?;
            let Some(on_chain) = txn.on_chain_height else {
                continue;
            };
            if txn.confirmed_height.is_some() || block_height - on_chain < confirmations {
                continue;
            }
            txn.confirmed_height = Some(on_chain + confirmations);
            self.put(&mut batch, &txn);
            confirmed.push(txn);
        }
        self.store.write_batch(&batch)?;
        Ok(confirmed)
    }

    /// Clears heights above `max_valid_height`. Returns the highest cleared
    /// height per affected account.
    pub fn revert_above(
        &self,
        max_valid_height: i64,
    ) -> Result<BTreeMap<Address, i64>, LedgerError> {
        let rows = self.store.scan_prefix(Column::Txn, &[])?;
        let mut batch = WriteBatch::new();
        let mut affected: BTreeMap<Address, i64> = BTreeMap::new();
        for (_, bytes) in rows {
            let mut txn: Txn = decode_record(&bytes, "txn")?;
            let mut cleared: Option<i64> = None;
            if let Some(height) = txn.confirmed_height.filter(|h| *h > max_valid_height) {
                txn.confirmed_height = None;
                cleared = Some(height);
            }
            if let Some(height) = txn.on_chain_height.filter(|h| *h > max_valid_height) {
                txn.on_chain_height = None;
                txn.confirmed_height = None;
                cleared = Some(cleared.map_or(height, |current| current.max(height)));
            }
            let Some(cleared) = cleared else {
                continue;
            };
            self.put(&mut batch, &txn);
            let mark = affected.entry(txn.account.clone()).or_insert(cleared);
            *mark = (*mark).max(cleared);
        }
        self.store.write_batch(&batch)?;
        Ok(affected)
    }

    pub fn accounts_dated_above(&self, height: i64) -> Result<Vec<Address>, LedgerError> {
        let rows = self.store.scan_prefix(Column::Txn, &[])?;
        let mut accounts = Vec::new();
        for (_, bytes) in rows {
            let txn: Txn = decode_record(&bytes, "txn")?;
            let dated_above = [txn.on_chain_height, txn.confirmed_height]
                .into_iter()
                .flatten()
                .any(|h| h > height);
            if dated_above {
                accounts.push(txn.account);
            }
        }
        Ok(accounts)
    }

    pub fn for_account(&self, account: &Address) -> Result<Vec<Txn>, LedgerError> {
        let rows = self
            .store
            .scan_prefix(Column::AccountTxn, &account_prefix(account))?;
        let mut txns = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let txid = key_suffix::<32>(&key).ok_or(LedgerError::Corrupt("account txn"))?;
            let txn = self
                .get(&txid)?
                .ok_or(LedgerError::Corrupt("account txn"))?;
            txns.push(txn);
        }
        Ok(txns)
    }

    fn put(&self, batch: &mut WriteBatch, txn: &Txn) {
        batch.put(Column::Txn, txn.id, encode(txn));
    }
}
