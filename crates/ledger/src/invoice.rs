//! Invoices, per-account listing order and the awaiting-payment set.

use dogeledger_primitives::encoding::encode;
use dogeledger_primitives::Address;
use dogeledger_storage::{Column, KeyValueStore, WriteBatch};

use crate::error::{decode_record, LedgerError};
use crate::keys::{
    account_invoice_key, account_prefix, check_owner, key_suffix, META_INVOICE_SEQ,
};
use crate::model::Invoice;

/// One page of [`InvoiceBook::list`]; `next_cursor == 0` marks the last page.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InvoicePage {
    pub items: Vec<Invoice>,
    pub next_cursor: u64,
}

pub struct InvoiceBook<S> {
    store: S,
}

impl<S> InvoiceBook<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> InvoiceBook<S> {
    pub fn get(&self, id: &Address) -> Result<Option<Invoice>, LedgerError> {
        match self.store.get(Column::Invoice, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(decode_record(&bytes, "invoice")?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, id: &Address) -> Result<Invoice, LedgerError> {
        self.get(id)?
            .ok_or_else(|| LedgerError::NotFound("invoice", id.to_string()))
    }

    /// Inserts an open invoice. A second invoice with the same id is
    /// rejected rather than overwriting the first.
    pub fn store(&self, invoice: &Invoice) -> Result<(), LedgerError> {
        check_owner("invoice id", &invoice.id)?;
        check_owner("invoice account", &invoice.account)?;
        if self.get(&invoice.id)?.is_some() {
            return Err(LedgerError::AlreadyExists("invoice", invoice.id.to_string()));
        }
        let seq = self.next_seq()?;
        let record = Invoice {
            paid: false,
            ..invoice.clone()
        };
        let mut batch = WriteBatch::new();
        batch.put(
            Column::Invoice,
            invoice.id.as_str().as_bytes(),
            encode(&record),
        );
        batch.put(
            Column::AccountInvoice,
            account_invoice_key(&invoice.account, seq),
            invoice.id.as_str().as_bytes(),
        );
        batch.put(Column::Meta, META_INVOICE_SEQ, seq.to_le_bytes());
        self.store.write_batch(&batch)?;
        Ok(())
    }

    /// Invoices of `account` in creation order, starting at `cursor`
    /// (0 for the first page). A `limit` of zero is treated as one.
    pub fn list(
        &self,
        account: &Address,
        cursor: u64,
        limit: usize,
    ) -> Result<InvoicePage, LedgerError> {
        let limit = limit.max(1);
        let rows = self.store.scan_prefix_from(
            Column::AccountInvoice,
            &account_prefix(account),
            &account_invoice_key(account, cursor),
            limit.saturating_add(1),
        )?;
        let mut page = InvoicePage::default();
        for (key, value) in rows {
            let seq = key_suffix::<8>(&key)
                .map(u64::from_be_bytes)
                .ok_or(LedgerError::Corrupt("account invoice"))?;
            if page.items.len() == limit {
                page.next_cursor = seq;
                break;
            }
            let id = String::from_utf8(value).map_err(|_| LedgerError::Corrupt("account invoice"))?;
            let invoice = self
                .get(&Address::new(id))?
                .ok_or(LedgerError::Corrupt("account invoice"))?;
            page.items.push(invoice);
        }
        Ok(page)
    }

    /// Returns `true` when this call moved the invoice to paid.
    pub fn mark_paid(&self, id: &Address) -> Result<bool, LedgerError> {
        let mut invoice = self.require(id)?;
        let mut batch = WriteBatch::new();
        batch.delete(Column::InvoiceAwaiting, id.as_str().as_bytes());
        let changed = !invoice.paid;
        if changed {
            invoice.paid = true;
            batch.put(Column::Invoice, id.as_str().as_bytes(), encode(&invoice));
        }
        self.store.write_batch(&batch)?;
        Ok(changed)
    }

    /// Adds the invoice at `address` to the awaiting set if it is still open.
    pub fn note_payment(&self, address: &Address) -> Result<bool, LedgerError> {
        match self.get(address)? {
            Some(invoice) if !invoice.paid => {
                self.store
                    .put(Column::InvoiceAwaiting, address.as_str().as_bytes(), &[])?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn awaiting_payment(&self) -> Result<Vec<Invoice>, LedgerError> {
        let rows = self.store.scan_prefix(Column::InvoiceAwaiting, &[])?;
        let mut invoices = Vec::with_capacity(rows.len());
        for (key, _) in rows {
            let id = String::from_utf8(key).map_err(|_| LedgerError::Corrupt("invoice awaiting"))?;
            if let Some(invoice) = self.get(&Address::new(id))? {
                if !invoice.paid {
                    invoices.push(invoice);
                }
            }
        }
        Ok(invoices)
    }

    fn next_seq(&self) -> Result<u64, LedgerError> {
        let current = match self.store.get(Column::Meta, META_INVOICE_SEQ)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LedgerError::Corrupt("invoice sequence"))?;
                u64::from_le_bytes(bytes)
            }
            None => 0,
        };
        current
            .checked_add(1)
            .ok_or(LedgerError::Corrupt("invoice sequence"))
    }
}
