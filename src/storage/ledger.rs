//! Time-Series Ledger
//!
//! Append-only score history per capture set and RMS mode. Rows are stored
//! in append (oldest-first) order and only reversed at the read boundary.
//!
//! Readers load an immutable snapshot of every series through `ArcSwap` and
//! never block the writer. Writers are serialized by a mutex; a new snapshot
//! is published only after the durable store accepted every row of the
//! recording in one batch, so neither readers nor a restarted process ever
//! observe a partially appended recording.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use super::counter::RecordingCounter;
use super::persistence::{LedgerStore, PendingRow};
use super::StorageError;
use crate::types::{InterferenceScore, RmsMode, RowMeta, SpecScores};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub capture_set_id: String,
    pub mode: RmsMode,
}

impl SeriesKey {
    pub fn new(capture_set_id: &str, mode: RmsMode) -> Self {
        Self {
            capture_set_id: capture_set_id.to_string(),
            mode,
        }
    }
}

/// One series in storage order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Spec columns; existing order is kept and new specs are appended.
    pub headers: Vec<String>,
    /// Oldest first.
    pub rows: Vec<InterferenceScore>,
}

impl Series {
    /// Append unseen columns, returning true if any were added.
    pub fn merge_headers<'a>(&mut self, columns: impl IntoIterator<Item = &'a str>) -> bool {
        let before = self.headers.len();
        for col in columns {
            if !self.headers.iter().any(|h| h == col) {
                self.headers.push(col.to_string());
            }
        }
        self.headers.len() != before
    }
}

/// Read-side view: header list plus newest-first rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerTable {
    pub headers: Vec<String>,
    pub rows: Vec<InterferenceScore>,
}

/// Rows per sealed chunk of a live series.
const CHUNK_ROWS: usize = 64;

/// Append-only row storage shared between snapshots.
///
/// Full chunks are sealed behind their own `Arc` and never copied again; an
/// append only clones the chunk index and the open tail, both bounded.
#[derive(Debug, Clone, Default)]
struct RowLog {
    sealed: Arc<Vec<Arc<[InterferenceScore]>>>,
    open: Arc<Vec<InterferenceScore>>,
}

impl RowLog {
    fn from_rows(rows: Vec<InterferenceScore>) -> Self {
        let mut log = Self::default();
        for row in rows {
            log.push(row);
        }
        log
    }

    fn len(&self) -> usize {
        self.sealed.len() * CHUNK_ROWS + self.open.len()
    }

    fn push(&mut self, row: InterferenceScore) {
        let open = Arc::make_mut(&mut self.open);
        open.push(row);
        if open.len() == CHUNK_ROWS {
            let full = std::mem::take(open);
            Arc::make_mut(&mut self.sealed).push(Arc::from(full));
        }
    }

    /// Oldest first.
    fn iter(&self) -> impl DoubleEndedIterator<Item = &InterferenceScore> + '_ {
        self.sealed
            .iter()
            .flat_map(|chunk| chunk.iter())
            .chain(self.open.iter())
    }

    fn newest_first(&self, limit: usize) -> Vec<InterferenceScore> {
        self.iter().rev().take(limit).cloned().collect()
    }
}

/// In-memory form of a series held by a snapshot.
#[derive(Debug, Clone, Default)]
struct LiveSeries {
    headers: Arc<Vec<String>>,
    rows: RowLog,
}

impl LiveSeries {
    fn from_stored(mut series: Series) -> Self {
        series.rows.sort_by_key(|r| r.counter);
        Self {
            headers: Arc::new(series.headers),
            rows: RowLog::from_rows(series.rows),
        }
    }

    /// Append unseen columns, returning true if any were added.
    fn merge_headers<'a>(&mut self, columns: impl IntoIterator<Item = &'a str>) -> bool {
        let fresh: Vec<&str> = columns
            .into_iter()
            .filter(|col| !self.headers.iter().any(|h| h == col))
            .collect();
        if fresh.is_empty() {
            return false;
        }
        let headers = Arc::make_mut(&mut self.headers);
        for col in fresh {
            if !headers.iter().any(|h| h == col) {
                headers.push(col.to_string());
            }
        }
        true
    }
}

type SeriesMap = HashMap<SeriesKey, Arc<LiveSeries>>;

pub struct Ledger {
    snapshot: ArcSwap<SeriesMap>,
    writer: Mutex<()>,
    counter: Box<dyn RecordingCounter>,
    store: Box<dyn LedgerStore>,
}

impl Ledger {
    /// Rebuild the ledger from `store` and seed `counter` past every
    /// counter already on record.
    pub fn open(
        store: Box<dyn LedgerStore>,
        counter: Box<dyn RecordingCounter>,
    ) -> Result<Self, StorageError> {
        let loaded = store.load()?;

        let max_counter = loaded
            .iter()
            .filter_map(|(_, s)| s.rows.iter().map(|r| r.counter).max())
            .max()
            .unwrap_or(0);
        counter.ensure_at_least(max_counter)?;

        let total_rows: usize = loaded.iter().map(|(_, s)| s.rows.len()).sum();
        info!(
            backend = store.backend_name(),
            series = loaded.len(),
            rows = total_rows,
            counter = max_counter,
            "Ledger restored"
        );

        let map: SeriesMap = loaded
            .into_iter()
            .map(|(k, s)| (k, Arc::new(LiveSeries::from_stored(s))))
            .collect();

        Ok(Self {
            snapshot: ArcSwap::from_pointee(map),
            writer: Mutex::new(()),
            counter,
            store,
        })
    }

    /// Append one row to one series under a fresh counter value.
    pub fn append(
        &self,
        meta: &RowMeta,
        mode: RmsMode,
        scores: SpecScores,
        columns: &[String],
    ) -> Result<InterferenceScore, StorageError> {
        let counter = self.append_rows(meta, columns, vec![(mode, scores.clone())])?;
        Ok(InterferenceScore::from_meta(counter, meta, scores))
    }

    /// Append one row per mode for a single recording. All rows share one
    /// counter value and are persisted and published together, or not at all.
    pub fn append_recording(
        &self,
        meta: &RowMeta,
        columns: &[String],
        standard: SpecScores,
        truncated: SpecScores,
    ) -> Result<u64, StorageError> {
        self.append_rows(
            meta,
            columns,
            vec![(RmsMode::Standard, standard), (RmsMode::Truncated, truncated)],
        )
    }

    fn append_rows(
        &self,
        meta: &RowMeta,
        columns: &[String],
        per_mode: Vec<(RmsMode, SpecScores)>,
    ) -> Result<u64, StorageError> {
        let _guard = self.writer.lock().map_err(|_| StorageError::Poisoned)?;

        let counter = self.counter.next()?;
        let current = self.snapshot.load_full();

        let mut staged: Vec<(SeriesKey, LiveSeries, InterferenceScore)> =
            Vec::with_capacity(per_mode.len());
        for (mode, scores) in per_mode {
            let key = SeriesKey::new(&meta.capture_set_id, mode);
            let mut series = current
                .get(&key)
                .map(|s| (**s).clone())
                .unwrap_or_default();

            let row = InterferenceScore::from_meta(counter, meta, scores);
            let widened = series.merge_headers(
                columns
                    .iter()
                    .map(String::as_str)
                    .chain(row.scores.spec_ids()),
            );
            if widened {
                debug!(series = %key.capture_set_id, mode = %mode, headers = ?series.headers, "Series columns extended");
            }
            staged.push((key, series, row));
        }

        let batch: Vec<PendingRow<'_>> = staged
            .iter()
            .map(|(key, series, row)| PendingRow {
                key,
                headers: series.headers.as_slice(),
                row,
            })
            .collect();
        self.store.append(&batch)?;
        drop(batch);

        let mut next: SeriesMap = (*current).clone();
        for (key, mut series, row) in staged {
            series.rows.push(row);
            next.insert(key, Arc::new(series));
        }
        self.snapshot.store(Arc::new(next));
        Ok(counter)
    }

    fn series(&self, capture_set_id: &str, mode: RmsMode) -> Option<Arc<LiveSeries>> {
        self.snapshot
            .load()
            .get(&SeriesKey::new(capture_set_id, mode))
            .cloned()
    }

    /// Up to `limit` rows, newest first.
    pub fn latest(&self, capture_set_id: &str, mode: RmsMode, limit: usize) -> Vec<InterferenceScore> {
        self.series(capture_set_id, mode)
            .map(|s| s.rows.newest_first(limit))
            .unwrap_or_default()
    }

    /// Every row, newest first.
    pub fn all(&self, capture_set_id: &str, mode: RmsMode) -> Vec<InterferenceScore> {
        self.latest(capture_set_id, mode, usize::MAX)
    }

    pub fn headers(&self, capture_set_id: &str, mode: RmsMode) -> Vec<String> {
        self.series(capture_set_id, mode)
            .map(|s| s.headers.to_vec())
            .unwrap_or_default()
    }

    /// Headers plus newest-first rows, optionally bounded.
    pub fn table(&self, capture_set_id: &str, mode: RmsMode, limit: Option<usize>) -> LedgerTable {
        match self.series(capture_set_id, mode) {
            Some(s) => LedgerTable {
                headers: s.headers.to_vec(),
                rows: s.rows.newest_first(limit.unwrap_or(usize::MAX)),
            },
            None => LedgerTable::default(),
        }
    }

    pub fn row_count(&self, capture_set_id: &str, mode: RmsMode) -> usize {
        self.series(capture_set_id, mode).map_or(0, |s| s.rows.len())
    }

    pub fn last_counter(&self) -> Result<u64, StorageError> {
        self.counter.current()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryCounter, MemoryStore};

    fn ledger() -> Ledger {
        Ledger::open(Box::new(MemoryStore::new()), Box::new(MemoryCounter::new())).unwrap()
    }

    fn meta(set: &str) -> RowMeta {
        RowMeta {
            capture_set_id: set.to_string(),
            date: "2024-03-01".to_string(),
            time: "18:30".to_string(),
            note: String::new(),
        }
    }

    fn scores(cells: &[(&str, f64)]) -> SpecScores {
        cells.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn cols(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_latest_is_newest_first_with_decreasing_counter() {
        let l = ledger();
        let columns = cols(&["40m"]);
        for i in 0..5 {
            l.append(&meta("HF_bands"), RmsMode::Standard, scores(&[("40m", i as f64)]), &columns)
                .unwrap();
        }
        let rows = l.latest("HF_bands", RmsMode::Standard, 5);
        assert_eq!(rows.len(), 5);
        assert!(rows.windows(2).all(|w| w[0].counter > w[1].counter));
        assert_eq!(rows[0].scores.get("40m"), Some(4.0));

        assert_eq!(l.latest("HF_bands", RmsMode::Standard, 2).len(), 2);
        assert_eq!(l.all("HF_bands", RmsMode::Standard).len(), 5);
    }

    #[test]
    fn test_counter_is_global_across_capture_sets() {
        let l = ledger();
        let a = l.append(&meta("A"), RmsMode::Standard, scores(&[]), &[]).unwrap();
        let b = l.append(&meta("B"), RmsMode::Standard, scores(&[]), &[]).unwrap();
        let c = l.append(&meta("A"), RmsMode::Standard, scores(&[]), &[]).unwrap();
        assert_eq!((a.counter, b.counter, c.counter), (1, 2, 3));
    }

    #[test]
    fn test_recording_rows_share_counter() {
        let l = ledger();
        let columns = cols(&["40m", "20m"]);
        let n = l
            .append_recording(
                &meta("HF_bands"),
                &columns,
                scores(&[("40m", 30.0), ("20m", 10.0)]),
                scores(&[("40m", 25.0), ("20m", 9.0)]),
            )
            .unwrap();
        let s = l.latest("HF_bands", RmsMode::Standard, 1);
        let t = l.latest("HF_bands", RmsMode::Truncated, 1);
        assert_eq!(s[0].counter, n);
        assert_eq!(t[0].counter, n);
        assert_eq!(t[0].scores.get("40m"), Some(25.0));
    }

    #[test]
    fn test_headers_merge_in_declaration_order() {
        let l = ledger();
        l.append(&meta("S"), RmsMode::Standard, scores(&[("a", 1.0)]), &cols(&["a", "b"]))
            .unwrap();
        l.append(&meta("S"), RmsMode::Standard, scores(&[("c", 1.0)]), &cols(&["c", "a"]))
            .unwrap();
        let table = l.table("S", RmsMode::Standard, None);
        assert_eq!(table.headers, cols(&["a", "b", "c"]));
        // Rows stay sparse.
        assert_eq!(table.rows[0].scores.get("a"), None);
        assert_eq!(table.rows[1].scores.get("c"), None);
    }

    #[test]
    fn test_unknown_series_is_empty() {
        let l = ledger();
        assert!(l.latest("nope", RmsMode::Truncated, 10).is_empty());
        assert!(l.table("nope", RmsMode::Truncated, Some(3)).headers.is_empty());
    }

    #[test]
    fn test_open_seeds_counter_from_store() {
        let key = SeriesKey::new("HF_bands", RmsMode::Standard);
        let mut series = Series::default();
        series.rows.push(InterferenceScore::from_meta(17, &meta("HF_bands"), scores(&[])));
        let store = MemoryStore::with_series(vec![(key, series)]);

        let l = Ledger::open(Box::new(store), Box::new(MemoryCounter::new())).unwrap();
        let row = l.append(&meta("HF_bands"), RmsMode::Standard, scores(&[]), &[]).unwrap();
        assert_eq!(row.counter, 18);
        assert_eq!(l.row_count("HF_bands", RmsMode::Standard), 2);
    }

    #[test]
    fn test_snapshot_taken_before_append_is_unchanged() {
        let l = ledger();
        l.append(&meta("S"), RmsMode::Standard, scores(&[("a", 1.0)]), &[]).unwrap();
        let before = l.series("S", RmsMode::Standard).unwrap();
        l.append(&meta("S"), RmsMode::Standard, scores(&[("a", 2.0)]), &[]).unwrap();
        assert_eq!(before.rows.len(), 1);
        assert_eq!(l.row_count("S", RmsMode::Standard), 2);
    }

    #[test]
    fn test_sealed_chunks_are_shared_between_snapshots() {
        let l = ledger();
        let total = 2 * CHUNK_ROWS + 1;
        for i in 0..total {
            l.append(&meta("S"), RmsMode::Standard, scores(&[("a", i as f64)]), &[])
                .unwrap();
        }
        let before = l.series("S", RmsMode::Standard).unwrap();
        l.append(&meta("S"), RmsMode::Standard, scores(&[("a", -1.0)]), &[])
            .unwrap();
        let after = l.series("S", RmsMode::Standard).unwrap();

        assert_eq!(before.rows.len(), total);
        assert_eq!(after.rows.len(), total + 1);
        assert_eq!(after.rows.sealed.len(), 2);
        assert!(Arc::ptr_eq(&before.rows.sealed[0], &after.rows.sealed[0]));
        assert!(Arc::ptr_eq(&before.rows.sealed[1], &after.rows.sealed[1]));

        // Order holds across chunk boundaries.
        let counters: Vec<u64> = l
            .all("S", RmsMode::Standard)
            .iter()
            .map(|r| r.counter)
            .collect();
        let expected: Vec<u64> = (1..=total as u64 + 1).rev().collect();
        assert_eq!(counters, expected);
    }

    /// Accepts standard rows, refuses any batch that carries a truncated one.
    struct RefusesTruncated(MemoryStore);

    impl LedgerStore for RefusesTruncated {
        fn load(&self) -> Result<Vec<(SeriesKey, Series)>, StorageError> {
            self.0.load()
        }

        fn append(&self, batch: &[PendingRow<'_>]) -> Result<(), StorageError> {
            if batch.iter().any(|p| p.key.mode == RmsMode::Truncated) {
                return Err(StorageError::Io {
                    path: "rms_truncated.csv".into(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "log unavailable"),
                });
            }
            self.0.append(batch)
        }

        fn backend_name(&self) -> &'static str {
            "RefusesTruncated"
        }
    }

    #[test]
    fn test_failed_recording_is_not_published() {
        let l = Ledger::open(
            Box::new(RefusesTruncated(MemoryStore::new())),
            Box::new(MemoryCounter::new()),
        )
        .unwrap();
        let columns = cols(&["40m"]);

        let err = l.append_recording(
            &meta("HF_bands"),
            &columns,
            scores(&[("40m", 30.0)]),
            scores(&[("40m", 25.0)]),
        );
        assert!(err.is_err());
        assert_eq!(l.row_count("HF_bands", RmsMode::Standard), 0);
        assert_eq!(l.row_count("HF_bands", RmsMode::Truncated), 0);
        assert!(l.headers("HF_bands", RmsMode::Standard).is_empty());

        // A single-mode append still goes through.
        l.append(&meta("HF_bands"), RmsMode::Standard, scores(&[("40m", 1.0)]), &columns)
            .unwrap();
        assert_eq!(l.row_count("HF_bands", RmsMode::Standard), 1);
    }
}
