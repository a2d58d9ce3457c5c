//! Derived-address reverse index and the address-to-block index.

use std::collections::HashSet;

use dogeledger_primitives::encoding::encode;
use dogeledger_primitives::Address;
use dogeledger_storage::{Column, KeyValueStore, WriteBatch};

use crate::accounts::AccountIndex;
use crate::error::{decode_record, LedgerError};
use crate::keys::{account_address_key, address_block_key, check_owner, key_suffix, owner_prefix};
use crate::model::{AddressBlock, AddressRecord};

pub struct AddressIndex<S> {
    store: S,
}

impl<S> AddressIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> AddressIndex<S> {
    pub fn find(&self, address: &Address) -> Result<Option<AddressRecord>, LedgerError> {
        match self.store.get(Column::Address, address.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(decode_record(&bytes, "address")?)),
            None => Ok(None),
        }
    }

    /// Records `addresses` as keys `first_index..` of one chain of the
    /// account's wallet and advances the matching key counter past them.
    pub fn store_addresses(
        &self,
        account_id: &Address,
        addresses: &[Address],
        first_index: u32,
        is_internal: bool,
    ) -> Result<(), LedgerError> {
        let accounts = AccountIndex::new(&self.store);
        accounts.require_by_id(account_id)?;
        if addresses.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        let mut seen = HashSet::with_capacity(addresses.len());
        let mut next_index = first_index;
        for address in addresses {
            check_owner("address", address)?;
            if !seen.insert(address) {
                return Err(LedgerError::AlreadyExists("address", address.to_string()));
            }
            let record = AddressRecord {
                address: address.clone(),
                account: account_id.clone(),
                key_index: next_index,
                is_internal,
            };
            match self.find(address)? {
                Some(existing) if existing == record => {}
                Some(_) => {
                    return Err(LedgerError::AlreadyExists("address", address.to_string()));
                }
                None => {
                    let slot = account_address_key(account_id, is_internal, next_index);
                    if self.store.get(Column::AccountAddress, &slot)?.is_some() {
                        return Err(LedgerError::AlreadyExists(
                            "key index",
                            format!("{account_id}/{next_index}"),
                        ));
                    }
                    batch.put(
                        Column::Address,
                        address.as_str().as_bytes(),
                        encode(&record),
                    );
                    batch.put(Column::AccountAddress, slot, address.as_str().as_bytes());
                }
            }
            next_index = next_index
                .checked_add(1)
                .ok_or_else(|| LedgerError::Validation("key index overflow".to_string()))?;
        }
        self.store.write_batch(&batch)?;
        accounts.advance_key_counter(account_id, is_internal, next_index)
    }

    pub fn index_blocks(&self, entries: &[AddressBlock]) -> Result<(), LedgerError> {
        let mut batch = WriteBatch::new();
        for entry in entries {
            if entry.height < 0 {
                return Err(LedgerError::Validation(format!(
                    "negative block height {} for {}",
                    entry.height, entry.addr
                )));
            }
            batch.put(
                Column::AddressBlock,
                address_block_key(&entry.addr, entry.height),
                [],
            );
        }
        self.store.write_batch(&batch)?;
        Ok(())
    }

    /// Heights of blocks that paid or spent `address`, ascending.
    pub fn blocks_for(&self, address: &Address) -> Result<Vec<i64>, LedgerError> {
        let prefix = owner_prefix(address.as_str());
        let rows = self.store.scan_prefix(Column::AddressBlock, &prefix)?;
        let mut heights = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let height = key_suffix::<8>(&key)
                .map(u64::from_be_bytes)
                .and_then(|height| i64::try_from(height).ok())
                .ok_or(LedgerError::Corrupt("address block"))?;
            heights.push(height);
        }
        Ok(heights)
    }
}
