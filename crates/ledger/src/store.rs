//! Transactional facade over a [`KeyValueStore`] backend.
//!
//! One transaction is open at a time: [`LedgerStore::begin`] holds the writer
//! lock until the transaction commits, rolls back or is dropped. Writes are
//! buffered in an [`OverlayStore`] and reach the backend as a single batch
//! under the exclusive commit gate. Direct readers take the gate shared, so
//! they see either all of a commit or none of it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use dogeledger_primitives::encoding::encode;
use dogeledger_primitives::{hash256_to_hex, Address, Hash256, OutPoint};
use dogeledger_storage::overlay::OverlayStore;
use dogeledger_storage::{Column, KeyValueStore};

use crate::accounts::AccountIndex;
use crate::address_index::AddressIndex;
use crate::error::{decode_record, LedgerError};
use crate::invoice::{InvoiceBook, InvoicePage};
use crate::keys::{META_CHAIN_STATE, META_SCHEMA_VERSION};
use crate::model::{
    Account, AccountBalance, AddressBlock, AddressRecord, ChainState, Invoice, Txn, Utxo,
};
use crate::reorg::{self, RollbackMarks};
use crate::txn::TxnBook;
use crate::utxo::{NewUtxo, UtxoLedger};

pub const SCHEMA_VERSION: u32 = 1;

pub struct LedgerStore<S> {
    backend: S,
    writer: Mutex<()>,
    commit_gate: RwLock<()>,
    closed: AtomicBool,
}

impl<S: KeyValueStore> LedgerStore<S> {
    /// Wraps `backend`, writing the schema version on first use.
    pub fn open(backend: S) -> Result<Self, LedgerError> {
        match backend.get(Column::Meta, META_SCHEMA_VERSION)? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LedgerError::Corrupt("schema version"))?;
                let version = u32::from_le_bytes(bytes);
                if version != SCHEMA_VERSION {
                    return Err(LedgerError::Validation(format!(
                        "unsupported schema version {version} (expected {SCHEMA_VERSION})"
                    )));
                }
            }
            None => {
                backend.put(Column::Meta, META_SCHEMA_VERSION, &SCHEMA_VERSION.to_le_bytes())?;
                dogeledger_log::log_info!("initialised ledger schema v{SCHEMA_VERSION}");
            }
        }
        Ok(Self {
            backend,
            writer: Mutex::new(()),
            commit_gate: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Refuses new transactions. Waits for an open one to finish first.
    pub fn close(&self) {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn begin(&self) -> Result<LedgerTransaction<'_, S>, LedgerError> {
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }
        // A panic inside an earlier transaction discarded its overlay, so the
        // backend is still consistent and the lock can be reclaimed.
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }
        Ok(LedgerTransaction {
            store: self,
            view: Some(OverlayStore::new(&self.backend)),
            touched: BTreeSet::new(),
            bumped: BTreeSet::new(),
            writer: Some(writer),
        })
    }

    fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_invoice(&self, id: &Address) -> Result<Invoice, LedgerError> {
        let _gate = self.read_gate();
        InvoiceBook::new(&self.backend).require(id)
    }

    pub fn list_invoices(
        &self,
        account: &Address,
        cursor: u64,
        limit: usize,
    ) -> Result<InvoicePage, LedgerError> {
        let _gate = self.read_gate();
        InvoiceBook::new(&self.backend).list(account, cursor, limit)
    }

    pub fn get_account(&self, foreign_id: &str) -> Result<Account, LedgerError> {
        let _gate = self.read_gate();
        AccountIndex::new(&self.backend).require(foreign_id)
    }

    pub fn get_account_by_id(&self, id: &Address) -> Result<Account, LedgerError> {
        let _gate = self.read_gate();
        AccountIndex::new(&self.backend).require_by_id(id)
    }

    pub fn get_chain_state(&self) -> Result<ChainState, LedgerError> {
        let _gate = self.read_gate();
        read_chain_state(&self.backend)
    }

    pub fn get_all_unreserved_utxos(&self, account: &Address) -> Result<Vec<Utxo>, LedgerError> {
        let _gate = self.read_gate();
        UtxoLedger::new(&self.backend).unreserved(account)
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Result<Utxo, LedgerError> {
        let _gate = self.read_gate();
        UtxoLedger::new(&self.backend)
            .get(outpoint)?
            .ok_or_else(|| LedgerError::NotFound("utxo", outpoint.to_string()))
    }

    pub fn list_utxos(&self, account: &Address) -> Result<Vec<Utxo>, LedgerError> {
        let _gate = self.read_gate();
        UtxoLedger::new(&self.backend).for_account(account)
    }

    pub fn find_account_for_address(
        &self,
        address: &Address,
    ) -> Result<Option<AddressRecord>, LedgerError> {
        let _gate = self.read_gate();
        AddressIndex::new(&self.backend).find(address)
    }

    pub fn calculate_balance(&self, account: &Address) -> Result<AccountBalance, LedgerError> {
        let _gate = self.read_gate();
        UtxoLedger::new(&self.backend).balance(account)
    }
}

fn read_chain_state<S: KeyValueStore>(store: S) -> Result<ChainState, LedgerError> {
    match store.get(Column::Meta, META_CHAIN_STATE)? {
        Some(bytes) => decode_record(&bytes, "chain state"),
        None => Err(LedgerError::NotFound("chain state", String::new())),
    }
}

type View<'a, S> = OverlayStore<&'a S>;

/// A unit of work against a [`LedgerStore`].
///
/// Reads see committed data plus this transaction's own writes. After
/// `commit` or `rollback` every operation returns [`LedgerError::Closed`],
/// except `rollback`, which stays a no-op. Dropping an open transaction
/// rolls it back.
pub struct LedgerTransaction<'a, S: KeyValueStore> {
    store: &'a LedgerStore<S>,
    view: Option<View<'a, S>>,
    /// Accounts whose outputs or transactions changed.
    touched: BTreeSet<Address>,
    /// Accounts whose chain sequence was already bumped.
    bumped: BTreeSet<Address>,
    writer: Option<MutexGuard<'a, ()>>,
}

impl<'a, S: KeyValueStore> LedgerTransaction<'a, S> {
    fn view(&self) -> Result<&View<'a, S>, LedgerError> {
        self.view.as_ref().ok_or(LedgerError::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.view.is_some()
    }

    pub fn commit(&mut self) -> Result<(), LedgerError> {
        let prepared = self.prepare_commit();
        let view = self.view.take();
        let result = match (prepared, view) {
            (Ok(()), Some(view)) => self.flush(view),
            (Err(err), _) => Err(err),
            (Ok(()), None) => Err(LedgerError::Closed),
        };
        self.writer = None;
        result
    }

    pub fn rollback(&mut self) -> Result<(), LedgerError> {
        if let Some(view) = self.view.take() {
            let pending = view.pending_len().unwrap_or(0);
            dogeledger_log::log_trace!("rolled back transaction with {pending} pending write(s)");
        }
        self.writer = None;
        Ok(())
    }

    fn prepare_commit(&mut self) -> Result<(), LedgerError> {
        let view = self.view()?;
        let invoices = InvoiceBook::new(view);
        let addresses = AddressIndex::new(view);
        for key in view.pending_keys(Column::Invoice)? {
            let id = Address::new(
                String::from_utf8(key).map_err(|_| LedgerError::Corrupt("invoice"))?,
            );
            let Some(invoice) = invoices.get(&id)? else {
                continue;
            };
            match addresses.find(&invoice.id)? {
                Some(record) if record.account == invoice.account => {}
                Some(record) => {
                    return Err(LedgerError::Validation(format!(
                        "invoice {} belongs to {} but its address is owned by {}",
                        invoice.id, invoice.account, record.account
                    )));
                }
                None => {
                    return Err(LedgerError::Validation(format!(
                        "invoice {} is not an address of account {}",
                        invoice.id, invoice.account
                    )));
                }
            }
        }
        let pending = self.pending_chain_seq_bumps();
        let accounts = AccountIndex::new(view);
        for account in &pending {
            accounts.bump_chain_seq(account)?;
        }
        self.bumped.extend(pending);
        Ok(())
    }

    fn flush(&self, view: View<'a, S>) -> Result<(), LedgerError> {
        let batch = view.into_batch()?;
        if batch.is_empty() {
            return Ok(());
        }
        let _gate = self
            .store
            .commit_gate
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.store.backend.write_batch(&batch)?;
        dogeledger_log::log_debug!(
            "committed {} write(s), {} account(s) bumped",
            batch.len(),
            self.bumped.len()
        );
        Ok(())
    }

    fn touch(&mut self, account: &Address) {
        if !self.touched.contains(account) {
            self.touched.insert(account.clone());
        }
    }

    /// Accounts the next commit will bump, beyond those already bumped.
    pub fn pending_chain_seq_bumps(&self) -> Vec<Address> {
        self.touched.difference(&self.bumped).cloned().collect()
    }

    /// Outputs that reached the invoice address before the invoice itself
    /// put it straight into the awaiting set.
    pub fn store_invoice(&mut self, invoice: &Invoice) -> Result<(), LedgerError> {
        let view = self.view()?;
        let book = InvoiceBook::new(view);
        book.store(invoice)?;
        if let Some(record) = AddressIndex::new(view).find(&invoice.id)? {
            let paid_before = UtxoLedger::new(view)
                .for_address(&record.account, &invoice.id)?
                .iter()
                .any(|utxo| utxo.created_height.is_some());
            if paid_before {
                book.note_payment(&invoice.id)?;
            }
        }
        Ok(())
    }

    pub fn get_invoice(&self, id: &Address) -> Result<Invoice, LedgerError> {
        InvoiceBook::new(self.view()?).require(id)
    }

    pub fn list_invoices(
        &self,
        account: &Address,
        cursor: u64,
        limit: usize,
    ) -> Result<InvoicePage, LedgerError> {
        InvoiceBook::new(self.view()?).list(account, cursor, limit)
    }

    pub fn mark_invoice_as_paid(&mut self, id: &Address) -> Result<(), LedgerError> {
        InvoiceBook::new(self.view()?).mark_paid(id)?;
        Ok(())
    }

    pub fn list_invoices_awaiting_payment(&self) -> Result<Vec<Invoice>, LedgerError> {
        InvoiceBook::new(self.view()?).awaiting_payment()
    }

    pub fn create_account(&mut self, account: &Account) -> Result<(), LedgerError> {
        AccountIndex::new(self.view()?).create(account)
    }

    pub fn update_account(&mut self, account: &Account) -> Result<Account, LedgerError> {
        AccountIndex::new(self.view()?).update(account)
    }

    pub fn get_account(&self, foreign_id: &str) -> Result<Account, LedgerError> {
        AccountIndex::new(self.view()?).require(foreign_id)
    }

    pub fn get_account_by_id(&self, id: &Address) -> Result<Account, LedgerError> {
        AccountIndex::new(self.view()?).require_by_id(id)
    }

    pub fn store_addresses(
        &mut self,
        account_id: &Address,
        addresses: &[Address],
        first_address: u32,
        internal: bool,
    ) -> Result<(), LedgerError> {
        AddressIndex::new(self.view()?).store_addresses(
            account_id,
            addresses,
            first_address,
            internal,
        )
    }

    pub fn find_account_for_address(
        &self,
        address: &Address,
    ) -> Result<Option<AddressRecord>, LedgerError> {
        AddressIndex::new(self.view()?).find(address)
    }

    pub fn index_addresses(&mut self, entries: &[AddressBlock]) -> Result<(), LedgerError> {
        AddressIndex::new(self.view()?).index_blocks(entries)
    }

    pub fn get_address_blocks(&self, address: &Address) -> Result<Vec<i64>, LedgerError> {
        AddressIndex::new(self.view()?).blocks_for(address)
    }

    pub fn get_all_unreserved_utxos(&self, account: &Address) -> Result<Vec<Utxo>, LedgerError> {
        UtxoLedger::new(self.view()?).unreserved(account)
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Result<Utxo, LedgerError> {
        UtxoLedger::new(self.view()?)
            .get(outpoint)?
            .ok_or_else(|| LedgerError::NotFound("utxo", outpoint.to_string()))
    }

    pub fn list_utxos(&self, account: &Address) -> Result<Vec<Utxo>, LedgerError> {
        UtxoLedger::new(self.view()?).for_account(account)
    }

    /// Outputs paying `address`; empty when the address is not tracked.
    pub fn get_utxos_for_address(&self, address: &Address) -> Result<Vec<Utxo>, LedgerError> {
        let view = self.view()?;
        match AddressIndex::new(view).find(address)? {
            Some(record) => UtxoLedger::new(view).for_address(&record.account, address),
            None => Ok(Vec::new()),
        }
    }

    pub fn calculate_balance(&self, account: &Address) -> Result<AccountBalance, LedgerError> {
        UtxoLedger::new(self.view()?).balance(account)
    }

    pub fn create_utxo(
        &mut self,
        output: &NewUtxo,
        block_height: i64,
    ) -> Result<Utxo, LedgerError> {
        let view = self.view()?;
        AccountIndex::new(view).require_by_id(&output.account)?;
        let utxo = UtxoLedger::new(view).create(output, block_height)?;
        InvoiceBook::new(view).note_payment(&output.pkh_address)?;
        self.touch(&output.account);
        Ok(utxo)
    }

    /// Owning account and address of the spent output, if it is tracked.
    pub fn mark_utxo_spent(
        &mut self,
        outpoint: &OutPoint,
        spent_height: i64,
    ) -> Result<Option<(Address, Address)>, LedgerError> {
        let spent = UtxoLedger::new(self.view()?).mark_spent(outpoint, spent_height)?;
        Ok(spent.map(|utxo| {
            self.touch(&utxo.account);
            (utxo.account, utxo.pkh_address)
        }))
    }

    pub fn confirm_utxos(
        &mut self,
        confirmations: u32,
        block_height: i64,
    ) -> Result<Vec<Utxo>, LedgerError> {
        let confirmed = UtxoLedger::new(self.view()?).confirm(confirmations, block_height)?;
        for utxo in &confirmed {
            self.touch(&utxo.account);
        }
        Ok(confirmed)
    }

    pub fn create_txn(&mut self, txn: &Txn) -> Result<(), LedgerError> {
        TxnBook::new(self.view()?).create(txn)?;
        self.touch(&txn.account);
        Ok(())
    }

    pub fn get_txn(&self, txid: &Hash256) -> Result<Txn, LedgerError> {
        TxnBook::new(self.view()?)
            .get(txid)?
            .ok_or_else(|| LedgerError::NotFound("txn", hash256_to_hex(txid)))
    }

    pub fn list_txns(&self, account: &Address) -> Result<Vec<Txn>, LedgerError> {
        TxnBook::new(self.view()?).for_account(account)
    }

    pub fn mark_txn_on_chain(
        &mut self,
        txid: &Hash256,
        height: i64,
    ) -> Result<Option<Txn>, LedgerError> {
        let txn = TxnBook::new(self.view()?).mark_on_chain(txid, height)?;
        if let Some(txn) = &txn {
            self.touch(&txn.account);
        }
        Ok(txn)
    }

    pub fn confirm_txns(
        &mut self,
        confirmations: u32,
        block_height: i64,
    ) -> Result<Vec<Txn>, LedgerError> {
        let confirmed = TxnBook::new(self.view()?).confirm(confirmations, block_height)?;
        for txn in &confirmed {
            self.touch(&txn.account);
        }
        Ok(confirmed)
    }

    pub fn update_chain_state(&mut self, state: &ChainState) -> Result<(), LedgerError> {
        self.view()?
            .put(Column::Meta, META_CHAIN_STATE, &encode(state))?;
        Ok(())
    }

    pub fn get_chain_state(&self) -> Result<ChainState, LedgerError> {
        read_chain_state(self.view()?)
    }

    pub fn revert_utxos_above_height(&mut self, max_valid_height: i64) -> Result<(), LedgerError> {
        let view = self.view()?;
        let cleared = UtxoLedger::new(view).revert_above(max_valid_height)?;
        RollbackMarks::new(view).record(&cleared)?;
        for account in cleared.keys() {
            self.touch(account);
        }
        Ok(())
    }

    pub fn revert_txns_above_height(&mut self, max_valid_height: i64) -> Result<(), LedgerError> {
        let view = self.view()?;
        let cleared = TxnBook::new(view).revert_above(max_valid_height)?;
        RollbackMarks::new(view).record(&cleared)?;
        for account in cleared.keys() {
            self.touch(account);
        }
        Ok(())
    }

    /// Bumps each listed account's chain sequence once; duplicates collapse.
    pub fn inc_chain_seq_for_accounts(&mut self, ids: &[Address]) -> Result<(), LedgerError> {
        let unique: BTreeSet<&Address> = ids.iter().collect();
        let accounts = AccountIndex::new(self.view()?);
        for id in &unique {
            accounts.require_by_id(id)?;
        }
        for id in &unique {
            accounts.bump_chain_seq(id)?;
        }
        self.bumped.extend(unique.into_iter().cloned());
        Ok(())
    }

    pub fn inc_accounts_affected_by_rollback(
        &mut self,
        max_valid_height: i64,
    ) -> Result<Vec<Address>, LedgerError> {
        let affected = reorg::affected_accounts(self.view()?, max_valid_height)?;
        let accounts = AccountIndex::new(self.view()?);
        let mut bumped = Vec::with_capacity(affected.len());
        for account in affected {
            // Marks can outlive a deprovisioned account.
            if accounts.get_by_id(&account)?.is_none() {
                continue;
            }
            accounts.bump_chain_seq(&account)?;
            bumped.push(account);
        }
        self.bumped.extend(bumped.iter().cloned());
        Ok(bumped)
    }
}

impl<S: KeyValueStore> Drop for LedgerTransaction<'_, S> {
    fn drop(&mut self) {
        let _ = self.rollback();
    }
}
