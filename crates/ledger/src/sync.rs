//! Chain follower: applies block and rollback events to the ledger.

use std::collections::BTreeSet;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use dogeledger_log::{log_debug, log_info, log_warn};
use dogeledger_primitives::{
    classify_script_pubkey, format_coins, hash256_to_hex, script_pubkey_to_address, Address,
    AddressKind, CoinAmount, Hash256, Network, OutPoint, ScriptType,
};
use dogeledger_storage::KeyValueStore;

use crate::error::LedgerError;
use crate::model::{AddressBlock, ChainState};
use crate::reorg;
use crate::store::{LedgerStore, LedgerTransaction};
use crate::utxo::NewUtxo;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockTxOut {
    pub value: CoinAmount,
    pub script_pubkey: Vec<u8>,
    /// Used when the script is absent or nonstandard.
    pub address: Option<Address>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockTx {
    pub txid: Hash256,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<BlockTxOut>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainBlock {
    pub hash: Hash256,
    pub height: i64,
    pub txs: Vec<BlockTx>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChainEvent {
    Block(ChainBlock),
    Rollback {
        max_valid_height: i64,
        best_block_hash: Hash256,
    },
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockReport {
    pub height: i64,
    pub utxos_created: usize,
    pub utxos_spent: usize,
    pub utxos_confirmed: usize,
    pub txns_confirmed: usize,
    pub invoices_paid: Vec<Address>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FollowerReport {
    Block(BlockReport),
    Rollback {
        max_valid_height: i64,
        accounts: Vec<Address>,
    },
}

pub struct ChainFollower<S> {
    store: Arc<LedgerStore<S>>,
    network: Network,
    confirmations: u32,
}

impl<S: KeyValueStore> ChainFollower<S> {
    /// `confirmations` is the default depth, used for outputs and for
    /// invoices that do not set their own.
    pub fn new(store: Arc<LedgerStore<S>>, network: Network, confirmations: u32) -> Self {
        Self {
            store,
            network,
            confirmations,
        }
    }

    pub fn store(&self) -> &Arc<LedgerStore<S>> {
        &self.store
    }

    /// Height of the last applied block, if any.
    pub fn resume_height(&self) -> Result<Option<i64>, LedgerError> {
        match self.store.get_chain_state() {
            Ok(state) => Ok(Some(state.best_block_height)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn apply(&self, event: &ChainEvent) -> Result<FollowerReport, LedgerError> {
        match event {
            ChainEvent::Block(block) => self.apply_block(block).map(FollowerReport::Block),
            ChainEvent::Rollback {
                max_valid_height,
                best_block_hash,
            } => {
                let accounts = self.apply_rollback(*max_valid_height, *best_block_hash)?;
                Ok(FollowerReport::Rollback {
                    max_valid_height: *max_valid_height,
                    accounts,
                })
            }
        }
    }

    /// Applies events until the sender side disconnects.
    pub fn run(&self, events: Receiver<ChainEvent>) -> Result<u64, LedgerError> {
        let mut applied = 0u64;
        for event in events {
            self.apply(&event)?;
            applied += 1;
        }
        log_info!("chain event feed closed after {applied} event(s)");
        Ok(applied)
    }

    pub fn apply_block(&self, block: &ChainBlock) -> Result<BlockReport, LedgerError> {
        if let Some(best) = self.resume_height()? {
            if block.height > best + 1 {
                log_warn!(
                    "block {} at height {} skips {} height(s) after {best}",
                    hash256_to_hex(&block.hash),
                    block.height,
                    block.height - best - 1
                );
            }
        }

        let mut tx = self.store.begin()?;
        let mut report = BlockReport {
            height: block.height,
            ..BlockReport::default()
        };
        let mut seen: BTreeSet<Address> = BTreeSet::new();
        for block_tx in &block.txs {
            for input in &block_tx.inputs {
                if let Some((_, address)) = tx.mark_utxo_spent(input, block.height)? {
                    report.utxos_spent += 1;
                    seen.insert(address);
                }
            }
            for (vout, output) in block_tx.outputs.iter().enumerate() {
                let Some((address, script_type)) = self.output_address(output) else {
                    continue;
                };
                let Some(owner) = tx.find_account_for_address(&address)? else {
                    continue;
                };
                let vout = u32::try_from(vout)
                    .map_err(|_| LedgerError::Validation("output index overflow".to_string()))?;
                tx.create_utxo(
                    &NewUtxo {
                        outpoint: OutPoint::new(block_tx.txid, vout),
                        value: output.value,
                        script_type: script_type.as_str().to_string(),
                        pkh_address: address.clone(),
                        account: owner.account,
                        key_index: owner.key_index,
                        is_internal: owner.is_internal,
                    },
                    block.height,
                )?;
                report.utxos_created += 1;
                seen.insert(address);
            }
            tx.mark_txn_on_chain(&block_tx.txid, block.height)?;
        }

        let entries: Vec<AddressBlock> = seen
            .into_iter()
            .map(|addr| AddressBlock {
                addr,
                height: block.height,
            })
            .collect();
        tx.index_addresses(&entries)?;
        report.utxos_confirmed = tx.confirm_utxos(self.confirmations, block.height)?.len();
        report.txns_confirmed = tx.confirm_txns(self.confirmations, block.height)?.len();
        let settled = self.settle_invoices(&mut tx, block.height)?;
        report.invoices_paid = settled.iter().map(|(id, _)| id.clone()).collect();
        tx.update_chain_state(&ChainState {
            best_block_hash: block.hash,
            best_block_height: block.height,
        })?;
        tx.commit()?;

        log_debug!(
            "block {} height {}: +{} utxo(s), {} spent, {} confirmed, {} invoice(s) paid",
            hash256_to_hex(&block.hash),
            block.height,
            report.utxos_created,
            report.utxos_spent,
            report.utxos_confirmed,
            report.invoices_paid.len()
        );
        for (invoice, received) in &settled {
            log_info!(
                "invoice {invoice} paid at height {} ({} DOGE received)",
                block.height,
                format_coins(*received)
            );
        }
        Ok(report)
    }

    pub fn apply_rollback(
        &self,
        max_valid_height: i64,
        best_block_hash: Hash256,
    ) -> Result<Vec<Address>, LedgerError> {
        let mut tx = self.store.begin()?;
        let accounts = reorg::rollback_to(&mut tx, max_valid_height, best_block_hash)?;
        tx.commit()?;
        Ok(accounts)
    }

    /// Marks paid every awaiting invoice whose address has received its total
    /// at the invoice's required depth.
    fn settle_invoices(
        &self,
        tx: &mut LedgerTransaction<'_, S>,
        best_height: i64,
    ) -> Result<Vec<(Address, CoinAmount)>, LedgerError> {
        let mut paid = Vec::new();
        for invoice in tx.list_invoices_awaiting_payment()? {
            let required = i64::from(invoice.required_confirmations(self.confirmations));
            let received = tx
                .get_utxos_for_address(&invoice.id)?
                .iter()
                .filter(|utxo| utxo.depth_at(best_height).is_some_and(|depth| depth >= required))
                .fold(0, |total: CoinAmount, utxo| total.saturating_add(utxo.value));
            if received >= invoice.total() {
                tx.mark_invoice_as_paid(&invoice.id)?;
                paid.push((invoice.id, received));
            }
        }
        Ok(paid)
    }

    fn output_address(&self, output: &BlockTxOut) -> Option<(Address, ScriptType)> {
        if let Some(address) = script_pubkey_to_address(&output.script_pubkey, self.network) {
            return Some((address, classify_script_pubkey(&output.script_pubkey)));
        }
        let address = output.address.clone()?;
        let script_type = match address.decode(self.network).ok()?.0 {
            AddressKind::PubkeyHash => ScriptType::P2Pkh,
            AddressKind::ScriptHash => ScriptType::P2Sh,
        };
        Some((address, script_type))
    }
}
