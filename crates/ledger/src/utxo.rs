//! UTXO records and the confirmation state machine.

use std::collections::BTreeMap;

use dogeledger_primitives::encoding::encode;
use dogeledger_primitives::outpoint::OUTPOINT_KEY_LEN;
use dogeledger_primitives::{Address, CoinAmount, Hash256, OutPoint};
use dogeledger_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::{decode_record, LedgerError};
use crate::keys::{
    account_prefix, account_utxo_key, key_suffix, pending_utxo_key, split_pending_utxo_key,
};
use crate::model::{AccountBalance, Utxo};

/// An output paying a tracked address, as seen in a block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewUtxo {
    pub outpoint: OutPoint,
    pub value: CoinAmount,
    pub script_type: String,
    pub pkh_address: Address,
    pub account: Address,
    pub key_index: u32,
    pub is_internal: bool,
}

pub struct UtxoLedger<S> {
    store: S,
}

impl<S> UtxoLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> UtxoLedger<S> {
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, LedgerError> {
        match self.store.get(Column::Utxo, &outpoint.key())? {
            Some(bytes) => Ok(Some(decode_record(&bytes, "utxo")?)),
            None => Ok(None),
        }
    }

    /// Inserts the output as pending at `block_height`.
    ///
    /// An outpoint that is already known is re-seated at the new height and
    /// loses its confirmation; one already pending at the same height is left
    /// as it is. A reservation survives either way.
    pub fn create(&self, output: &NewUtxo, block_height: i64) -> Result<Utxo, LedgerError> {
        if block_height < 0 {
            return Err(LedgerError::Validation(format!(
                "negative block height {block_height}"
            )));
        }
        if output.value < 0 {
            return Err(LedgerError::Validation(format!(
                "negative value for {}",
                output.outpoint
            )));
        }
        let existing = self.get(&output.outpoint)?;
        if let Some(existing) = &existing {
            if existing.account != output.account {
                return Err(LedgerError::AlreadyExists(
                    "utxo",
                    output.outpoint.to_string(),
                ));
            }
            if existing.created_height == Some(block_height) {
                return Ok(existing.clone());
            }
        }

        let mut batch = WriteBatch::new();
        let (spent_height, spending_txid) = match &existing {
            Some(existing) => {
                if let Some(height) = existing.created_height {
                    batch.delete(
                        Column::PendingUtxo,
                        pending_utxo_key(height, &existing.outpoint),
                    );
                }
                (existing.spent_height, existing.spending_txid)
            }
            None => (None, None),
        };
        let utxo = Utxo {
            outpoint: output.outpoint,
            value: output.value,
            script_type: output.script_type.clone(),
            pkh_address: output.pkh_address.clone(),
            account: output.account.clone(),
            key_index: output.key_index,
            is_internal: output.is_internal,
            created_height: Some(block_height),
            spendable_height: None,
            spent_height,
            spending_txid,
        };
        self.put(&mut batch, &utxo);
        batch.put(
            Column::AccountUtxo,
            account_utxo_key(&utxo.account, &utxo.outpoint),
            [],
        );
        batch.put(
            Column::PendingUtxo,
            pending_utxo_key(block_height, &utxo.outpoint),
            [],
        );
        self.store.write_batch(&batch)?;
        Ok(utxo)
    }

    /// Records the spend; `None` when the outpoint is not tracked.
    pub fn mark_spent(
        &self,
        outpoint: &OutPoint,
        spent_height: i64,
    ) -> Result<Option<Utxo>, LedgerError> {
        let Some(mut utxo) = self.get(outpoint)? else {
            return Ok(None);
        };
        if utxo.spent_height != Some(spent_height) {
            utxo.spent_height = Some(spent_height);
            let mut batch = WriteBatch::new();
            self.put(&mut batch, &utxo);
            self.store.write_batch(&batch)?;
        }
        Ok(Some(utxo))
    }

    /// Confirms every pending output at least `confirmations` blocks deep at
    /// `block_height`. Returns the outputs confirmed by this call.
    pub fn confirm(&self, confirmations: u32, block_height: i64) -> Result<Vec<Utxo>, LedgerError> {
        let confirmations = i64::from(confirmations);
        let deepest = block_height.saturating_sub(confirmations);
        if deepest < 0 {
            return Ok(Vec::new());
        }
        let rows = self.store.scan_prefix(Column::PendingUtxo, &[])?;
        let mut batch = WriteBatch::new();
        let mut confirmed = Vec::new();
        for (key, _) in rows {
            let (height, outpoint) =
                split_pending_utxo_key(&key).ok_or(LedgerError::Corrupt("pending utxo"))?;
            if height > deepest {
                break;
            }
            batch.delete(Column::PendingUtxo, key.as_slice());
            let Some(mut utxo) = self.get(&outpoint)? else {
                continue;
            };
            // Stale entry left behind by a re-seat.
            if utxo.created_height != Some(height) || utxo.spendable_height.is_some() {
                continue;
            }
            utxo.spendable_height = Some(height + confirmations);
            self.put(&mut batch, &utxo);
            confirmed.push(utxo);
        }
        self.store.write_batch(&batch)?;
        Ok(confirmed)
    }

    pub fn for_account(&self, account: &Address) -> Result<Vec<Utxo>, LedgerError> {
        let rows = self
            .store
            .scan_prefix(Column::AccountUtxo, &account_prefix(account))?;
        let mut utxos = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let outpoint = key_suffix::<OUTPOINT_KEY_LEN>(&key)
                .and_then(|suffix| OutPoint::from_key(&suffix))
                .ok_or(LedgerError::Corrupt("account utxo"))?;
            let utxo = self
                .get(&outpoint)?
                .ok_or(LedgerError::Corrupt("account utxo"))?;
            utxos.push(utxo);
        }
        Ok(utxos)
    }

    /// Seen on chain, unspent and not reserved by an outgoing transaction.
    pub fn unreserved(&self, account: &Address) -> Result<Vec<Utxo>, LedgerError> {
        Ok(self
            .for_account(account)?
            .into_iter()
            .filter(|utxo| {
                utxo.created_height.is_some() && utxo.spent_height.is_none() && !utxo.is_reserved()
            })
            .collect())
    }

    pub fn for_address(
        &self,
        account: &Address,
        address: &Address,
    ) -> Result<Vec<Utxo>, LedgerError> {
        Ok(self
            .for_account(account)?
            .into_iter()
            .filter(|utxo| &utxo.pkh_address == address)
            .collect())
    }

    pub fn balance(&self, account: &Address) -> Result<AccountBalance, LedgerError> {
        let mut balance = AccountBalance::default();
        for utxo in self.for_account(account)? {
            if utxo.created_height.is_none() || utxo.spent_height.is_some() {
                continue;
            }
            let bucket = if utxo.is_reserved() {
                &mut balance.outgoing
            } else if utxo.spendable_height.is_some() {
                &mut balance.current
            } else {
                &mut balance.incoming
            };
            *bucket = bucket.saturating_add(utxo.value);
        }
        Ok(balance)
    }

    pub fn reserve(&self, outpoint: &OutPoint, txid: &Hash256) -> Result<Utxo, LedgerError> {
        let mut utxo = self
            .get(outpoint)?
            .ok_or_else(|| LedgerError::NotFound("utxo", outpoint.to_string()))?;
        match utxo.spending_txid {
            Some(current) if &current == txid => return Ok(utxo),
            Some(_) => {
                return Err(LedgerError::Validation(format!(
                    "utxo {outpoint} is already reserved"
                )))
            }
            None => {}
        }
        if utxo.created_height.is_none() || utxo.spent_height.is_some() {
            return Err(LedgerError::Validation(format!(
                "utxo {outpoint} is not spendable"
            )));
        }
        utxo.spending_txid = Some(*txid);
        let mut batch = WriteBatch::new();
        self.put(&mut batch, &utxo);
        self.store.write_batch(&batch)?;
        Ok(utxo)
    }

    /// Clears every height above `max_valid_height`. Returns the highest
    /// cleared height per affected account.
    pub fn revert_above(
        &self,
        max_valid_height: i64,
    ) -> Result<BTreeMap<Address, i64>, LedgerError> {
        let rows = self.store.scan_prefix(Column::Utxo, &[])?;
        let mut batch = WriteBatch::new();
        let mut affected: BTreeMap<Address, i64> = BTreeMap::new();
        for (_, bytes) in rows {
            let mut utxo: Utxo = decode_record(&bytes, "utxo")?;
            let mut cleared: Option<i64> = None;
            let mut note = |height: i64| {
                cleared = Some(cleared.map_or(height, |current| current.max(height)));
            };
            if let Some(height) = utxo.spent_height.filter(|h| *h > max_valid_height) {
                utxo.spent_height = None;
                note(height);
            }
            if let Some(height) = utxo.spendable_height.filter(|h| *h > max_valid_height) {
                utxo.spendable_height = None;
                note(height);
                if let Some(created) = utxo.created_height {
                    batch.put(
                        Column::PendingUtxo,
                        pending_utxo_key(created, &utxo.outpoint),
                        [],
                    );
                }
            }
            if let Some(height) = utxo.created_height.filter(|h| *h > max_valid_height) {
                utxo.created_height = None;
                utxo.spendable_height = None;
                note(height);
                batch.delete(Column::PendingUtxo, pending_utxo_key(height, &utxo.outpoint));
            }
            let Some(cleared) = cleared else {
                continue;
            };
            self.put(&mut batch, &utxo);
            let mark = affected.entry(utxo.account.clone()).or_insert(cleared);
            *mark = (*mark).max(cleared);
        }
        self.store.write_batch(&batch)?;
        Ok(affected)
    }

    /// Accounts holding any output with a height above `height`.
    pub fn accounts_dated_above(&self, height: i64) -> Result<Vec<Address>, LedgerError> {
        let rows = self.store.scan_prefix(Column::Utxo, &[])?;
        let mut accounts = Vec::new();
        for (_, bytes) in rows {
            let utxo: Utxo = decode_record(&bytes, "utxo")?;
            let dated_above = [utxo.created_height, utxo.spendable_height, utxo.spent_height]
                .into_iter()
                .flatten()
                .any(|h| h > height);
            if dated_above {
                accounts.push(utxo.account);
            }
        }
        Ok(accounts)
    }

    fn put(&self, batch: &mut WriteBatch, utxo: &Utxo) {
        batch.put(Column::Utxo, utxo.outpoint.key(), encode(utxo));
    }
}
