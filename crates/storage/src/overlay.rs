//! Buffered write layer over another store.
//!
//! Reads see the pending writes first and fall back to the base store.
//! Nothing reaches the base until [`OverlayStore::into_batch`] is applied
//! with [`KeyValueStore::write_batch`].

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use crate::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch, WriteOp};

/// `None` marks a pending delete.
type PendingMap = BTreeMap<(Column, Vec<u8>), Option<Vec<u8>>>;
type PendingRows = Vec<(Vec<u8>, Option<Vec<u8>>)>;

pub struct OverlayStore<S> {
    base: S,
    pending: Mutex<PendingMap>,
}

impl<S: KeyValueStore> OverlayStore<S> {
    pub fn new(base: S) -> Self {
        Self {
            base,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn pending_len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    /// Keys in `column` written (put or delete) through this overlay.
    pub fn pending_keys(&self, column: Column) -> Result<Vec<Vec<u8>>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .range((Bound::Included((column, Vec::new())), Bound::Unbounded))
            .take_while(|((entry_column, _), _)| *entry_column == column)
            .map(|((_, key), _)| key.clone())
            .collect())
    }

    pub fn discard(&self) -> Result<(), StoreError> {
        self.lock()?.clear();
        Ok(())
    }

    /// Drains pending writes into a batch, in column then key order.
    pub fn into_batch(self) -> Result<WriteBatch, StoreError> {
        let pending = self
            .pending
            .into_inner()
            .map_err(|_| StoreError::Backend("overlay lock poisoned".to_string()))?;
        let mut batch = WriteBatch::new();
        for ((column, key), value) in pending {
            match value {
                Some(value) => batch.put(column, key, value),
                None => batch.delete(column, key),
            }
        }
        Ok(batch)
    }

    fn lock(&self) -> Result<MutexGuard<'_, PendingMap>, StoreError> {
        self.pending
            .lock()
            .map_err(|_| StoreError::Backend("overlay lock poisoned".to_string()))
    }

    /// Pending entries of `column` from `lower` onwards that share `prefix`.
    fn pending_range(
        &self,
        column: Column,
        prefix: &[u8],
        lower: &[u8],
    ) -> Result<PendingRows, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .range((Bound::Included((column, lower.to_vec())), Bound::Unbounded))
            .take_while(|((entry_column, key), _)| *entry_column == column && key.starts_with(prefix))
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    fn merged_scan(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let base_rows = self.base.scan_prefix(column, prefix)?;
        let pending = self.pending_range(column, prefix, prefix)?;
        Ok(merge_rows(base_rows, pending, usize::MAX))
    }
}

/// Merges ascending base rows with ascending pending entries, pending
/// entries shadowing base rows of the same key, and stops at `limit` rows.
fn merge_rows(base_rows: ScanResult, pending: PendingRows, limit: usize) -> ScanResult {
    let mut merged = Vec::with_capacity(base_rows.len().saturating_add(pending.len()).min(limit));
    let mut base_iter = base_rows.into_iter().peekable();
    let mut pending_iter = pending.into_iter().peekable();
    while merged.len() < limit {
        let take_base = match (base_iter.peek(), pending_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some((base_key, _)), Some((pending_key, _))) => {
                if base_key == pending_key {
                    // Shadowed by the pending entry.
                    base_iter.next();
                    false
                } else {
                    base_key < pending_key
                }
            }
        };
        if take_base {
            if let Some(row) = base_iter.next() {
                merged.push(row);
            }
        } else if let Some((key, Some(value))) = pending_iter.next() {
            merged.push((key, value));
        }
    }
    merged
}

impl<S: KeyValueStore> KeyValueStore for OverlayStore<S> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        {
            let guard = self.lock()?;
            if let Some(value) = guard.get(&(column, key.to_vec())) {
                return Ok(value.clone());
            }
        }
        self.base.get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.lock()?
            .insert((column, key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.lock()?.insert((column, key.to_vec()), None);
        Ok(())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.merged_scan(column, prefix)
    }

    /// Base rows hidden by pending deletes are made up for by asking the
    /// base for that many extra rows.
    fn scan_prefix_from(
        &self,
        column: Column,
        prefix: &[u8],
        start: &[u8],
        limit: usize,
    ) -> Result<ScanResult, StoreError> {
        let lower = if start > prefix { start } else { prefix };
        let pending = self.pending_range(column, prefix, lower)?;
        let deletes = pending.iter().filter(|(_, value)| value.is_none()).count();
        let base_limit = limit.saturating_add(deletes);
        let base_rows = self.base.scan_prefix_from(column, prefix, start, base_limit)?;
        Ok(merge_rows(base_rows, pending, limit))
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        for (key, value) in self.merged_scan(column, prefix)? {
            visitor(&key, &value)?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard.insert(
                        (*column, key.as_slice().to_vec()),
                        Some(value.as_slice().to_vec()),
                    );
                }
                WriteOp::Delete { column, key } => {
                    guard.insert((*column, key.as_slice().to_vec()), None);
                }
            }
        }
        Ok(())
    }
}
