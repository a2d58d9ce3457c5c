//! Account records keyed by foreign id, with a secondary index by account id.

use dogeledger_primitives::encoding::encode;
use dogeledger_primitives::Address;
use dogeledger_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::{decode_record, LedgerError};
use crate::keys::check_owner;
use crate::model::Account;

pub struct AccountIndex<S> {
    store: S,
}

impl<S> AccountIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> AccountIndex<S> {
    pub fn get(&self, foreign_id: &str) -> Result<Option<Account>, LedgerError> {
        match self.store.get(Column::Account, foreign_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_record(&bytes, "account")?)),
            None => Ok(None),
        }
    }

    pub fn get_by_id(&self, id: &Address) -> Result<Option<Account>, LedgerError> {
        let Some(foreign_id) = self.store.get(Column::AccountId, id.as_str().as_bytes())? else {
            return Ok(None);
        };
        let foreign_id =
            String::from_utf8(foreign_id).map_err(|_| LedgerError::Corrupt("account id"))?;
        self.get(&foreign_id)
    }

    pub fn require(&self, foreign_id: &str) -> Result<Account, LedgerError> {
        self.get(foreign_id)?
            .ok_or_else(|| LedgerError::NotFound("account", foreign_id.to_string()))
    }

    pub fn require_by_id(&self, id: &Address) -> Result<Account, LedgerError> {
        self.get_by_id(id)?
            .ok_or_else(|| LedgerError::NotFound("account", id.to_string()))
    }

    pub fn create(&self, account: &Account) -> Result<(), LedgerError> {
        if account.foreign_id.is_empty() {
            return Err(LedgerError::Validation("account foreign id is empty".to_string()));
        }
        check_owner("account id", &account.id)?;
        if self.get(&account.foreign_id)?.is_some() {
            return Err(LedgerError::AlreadyExists(
                "account",
                account.foreign_id.clone(),
            ));
        }
        if self
            .store
            .get(Column::AccountId, account.id.as_str().as_bytes())?
            .is_some()
        {
            return Err(LedgerError::AlreadyExists("account", account.id.to_string()));
        }
        let record = Account {
            chain_seq: 0,
            ..account.clone()
        };
        let mut batch = WriteBatch::new();
        self.put(&mut batch, &record);
        batch.put(
            Column::AccountId,
            account.id.as_str().as_bytes(),
            account.foreign_id.as_bytes(),
        );
        self.store.write_batch(&batch)?;
        Ok(())
    }

    /// Applies the mutable fields of `account` to the stored record.
    ///
    /// `id`, `privkey` and `chain_seq` are kept from the stored record. Key
    /// counters only move forward: a lower value leaves the stored one.
    pub fn update(&self, account: &Account) -> Result<Account, LedgerError> {
        let current = self.require(&account.foreign_id)?;
        let updated = Account {
            id: current.id.clone(),
            foreign_id: current.foreign_id.clone(),
            privkey: current.privkey.clone(),
            next_internal_key: current.next_internal_key.max(account.next_internal_key),
            next_external_key: current.next_external_key.max(account.next_external_key),
            next_pool_internal: current.next_pool_internal.max(account.next_pool_internal),
            next_pool_external: current.next_pool_external.max(account.next_pool_external),
            payout_address: account.payout_address.clone(),
            payout_threshold: account.payout_threshold,
            payout_frequency: account.payout_frequency.clone(),
            chain_seq: current.chain_seq,
        };
        if updated != current {
            let mut batch = WriteBatch::new();
            self.put(&mut batch, &updated);
            self.store.write_batch(&batch)?;
        }
        Ok(updated)
    }

    /// Raises the derivation counter for one chain of keys to at least `next`.
    pub fn advance_key_counter(
        &self,
        id: &Address,
        is_internal: bool,
        next: u32,
    ) -> Result<(), LedgerError> {
        let mut account = self.require_by_id(id)?;
        let counter = if is_internal {
            &mut account.next_internal_key
        } else {
            &mut account.next_external_key
        };
        if *counter >= next {
            return Ok(());
        }
        *counter = next;
        let mut batch = WriteBatch::new();
        self.put(&mut batch, &account);
        self.store.write_batch(&batch)?;
        Ok(())
    }

    pub fn bump_chain_seq(&self, id: &Address) -> Result<u64, LedgerError> {
        let mut account = self.require_by_id(id)?;
        account.chain_seq = account
            .chain_seq
            .checked_add(1)
            .ok_or_else(|| LedgerError::Validation(format!("chain seq overflow for {id}")))?;
        let mut batch = WriteBatch::new();
        self.put(&mut batch, &account);
        self.store.write_batch(&batch)?;
        Ok(account.chain_seq)
    }

    fn put(&self, batch: &mut WriteBatch, account: &Account) {
        batch.put(
            Column::Account,
            account.foreign_id.as_bytes(),
            encode(account),
        );
    }
}
