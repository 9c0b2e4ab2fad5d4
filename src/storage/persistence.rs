//! LedgerStore trait - pluggable durable sink for ledger series
//!
//! - `MemoryStore`: in-memory, for tests and ephemeral runs
//! - `CsvLogStore` (see `tabular`): one tabular log per capture set and mode

use std::collections::HashMap;
use std::sync::RwLock;

use super::ledger::{Series, SeriesKey};
use super::StorageError;
use crate::types::InterferenceScore;

/// One row headed for one series, with the series' full column list.
#[derive(Debug, Clone, Copy)]
pub struct PendingRow<'a> {
    pub key: &'a SeriesKey,
    /// Every column of the series, including any the row introduced.
    pub headers: &'a [String],
    pub row: &'a InterferenceScore,
}

/// Durable backing for the ledger.
///
/// Implementations must be thread-safe (Send + Sync); the ledger calls
/// `append` from its single writer only.
pub trait LedgerStore: Send + Sync {
    /// Every persisted series, rows in append order.
    fn load(&self) -> Result<Vec<(SeriesKey, Series)>, StorageError>;

    /// Persist every row of `batch` or none of them. On error no row of
    /// the batch may be visible to a later `load`.
    fn append(&self, batch: &[PendingRow<'_>]) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Not durable. Data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    series: RwLock<HashMap<SeriesKey, Series>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, as if loaded from disk.
    pub fn with_series(series: Vec<(SeriesKey, Series)>) -> Self {
        Self {
            series: RwLock::new(series.into_iter().collect()),
        }
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Vec<(SeriesKey, Series)>, StorageError> {
        let store = self.series.read().map_err(|_| StorageError::Poisoned)?;
        Ok(store.iter().map(|(k, s)| (k.clone(), s.clone())).collect())
    }

    fn append(&self, batch: &[PendingRow<'_>]) -> Result<(), StorageError> {
        // One write lock for the whole batch.
        let mut store = self.series.write().map_err(|_| StorageError::Poisoned)?;
        for pending in batch {
            let series = store.entry(pending.key.clone()).or_default();
            series.headers = pending.headers.to_vec();
            series.rows.push(pending.row.clone());
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RmsMode, SpecScores};

    fn row(counter: u64) -> InterferenceScore {
        InterferenceScore {
            counter,
            capture_set_id: "HF_bands".to_string(),
            date: "2024-03-01".to_string(),
            time: "12:00".to_string(),
            note: String::new(),
            scores: SpecScores::new(),
        }
    }

    #[test]
    fn test_memory_store_appends_batches_in_order() {
        let store = MemoryStore::new();
        let std_key = SeriesKey::new("HF_bands", RmsMode::Standard);
        let trunc_key = SeriesKey::new("HF_bands", RmsMode::Truncated);
        let headers = vec!["40m".to_string()];
        let (first, second) = (row(1), row(2));

        for r in [&first, &second] {
            store
                .append(&[
                    PendingRow { key: &std_key, headers: &headers, row: r },
                    PendingRow { key: &trunc_key, headers: &headers, row: r },
                ])
                .unwrap();
        }

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        for (_, series) in &loaded {
            let counters: Vec<u64> = series.rows.iter().map(|r| r.counter).collect();
            assert_eq!(counters, vec![1, 2]);
            assert_eq!(series.headers, headers);
        }
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn LedgerStore> = Box::new(MemoryStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        assert!(store.load().unwrap().is_empty());
    }
}
