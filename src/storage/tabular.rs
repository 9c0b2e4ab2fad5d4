//! Durable tabular score logs
//!
//! One comma-separated file per capture set and RMS mode:
//!
//! ```text
//! <data_dir>/<capture_set_id>/rms_standard.csv
//! <data_dir>/<capture_set_id>/rms_truncated.csv
//! ```
//!
//! Columns are `counter,date,time,note,<spec_1>,<spec_2>,...` in capture-spec
//! declaration order. A spec with no score in a row is written as `-1`.
//! When a row brings a new spec, the header is widened and the whole file
//! is rewritten through a temp file and a rename. The rows of one recording
//! land in every log or in none.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::ledger::{Series, SeriesKey};
use super::persistence::{LedgerStore, PendingRow};
use super::StorageError;
use crate::types::{InterferenceScore, RmsMode, RowMeta, SpecScores};

/// Fixed leading columns.
pub const META_COLUMNS: [&str; 4] = ["counter", "date", "time", "note"];

/// Cell value for a spec that was not scored.
pub const ABSENT_CELL: &str = "-1";

/// Parse one score cell. `-1`, empty and unparseable cells are absent.
pub fn parse_cell(cell: &str) -> Option<f64> {
    let value: f64 = cell.trim().parse().ok()?;
    (value.is_finite() && value != -1.0).then_some(value)
}

fn header_line(headers: &[String]) -> String {
    META_COLUMNS
        .iter()
        .copied()
        .chain(headers.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

fn row_line(headers: &[String], row: &InterferenceScore) -> String {
    let mut fields = vec![
        row.counter.to_string(),
        row.date.clone(),
        row.time.clone(),
        RowMeta::sanitize_note(&row.note),
    ];
    // `{}` on f64 prints the shortest text that parses back to the same value.
    fields.extend(headers.iter().map(|h| {
        row.scores
            .get(h)
            .map_or_else(|| ABSENT_CELL.to_string(), |v| v.to_string())
    }));
    fields.join(",")
}

pub struct CsvLogStore {
    root: PathBuf,
    /// Header currently on disk, per file.
    on_disk: Mutex<HashMap<PathBuf, Vec<String>>>,
}

impl CsvLogStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self {
            root,
            on_disk: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, key: &SeriesKey) -> PathBuf {
        self.root.join(&key.capture_set_id).join(key.mode.file_name())
    }

    fn read_series(path: &Path, capture_set_id: &str) -> Result<Series, StorageError> {
        let text = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
        let mut lines = text.lines();

        let header: Vec<&str> = lines
            .next()
            .map(|l| l.split(',').map(str::trim).collect())
            .unwrap_or_default();
        if header.len() < META_COLUMNS.len() || header[..META_COLUMNS.len()] != META_COLUMNS {
            return Err(StorageError::Malformed {
                path: path.to_path_buf(),
                line: 1,
                reason: format!("expected header to start with {}", META_COLUMNS.join(",")),
            });
        }
        let headers: Vec<String> = header[META_COLUMNS.len()..]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut rows = Vec::new();
        for (idx, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            let Some(counter) = fields.first().and_then(|c| c.trim().parse::<u64>().ok()) else {
                warn!(path = %path.display(), line = idx + 2, "Skipping log row without a counter");
                continue;
            };
            let field = |i: usize| fields.get(i).map_or("", |f| f.trim()).to_string();

            let mut scores = SpecScores::new();
            for (col, spec_id) in headers.iter().enumerate() {
                if let Some(v) = fields.get(META_COLUMNS.len() + col).and_then(|c| parse_cell(c)) {
                    scores.insert(spec_id, v);
                }
            }

            rows.push(InterferenceScore {
                counter,
                capture_set_id: capture_set_id.to_string(),
                date: field(1),
                time: field(2),
                note: field(3),
                scores,
            });
        }

        Ok(Series { headers, rows })
    }

    /// Write the whole series next to `path`, returning the temp file.
    fn write_tmp(path: &Path, series: &Series) -> Result<PathBuf, StorageError> {
        let tmp = path.with_extension("csv.tmp");
        let mut text = header_line(&series.headers);
        text.push('\n');
        for row in &series.rows {
            text.push_str(&row_line(&series.headers, row));
            text.push('\n');
        }
        if let Err(e) = fs::write(&tmp, text) {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::io(&tmp, e));
        }
        Ok(tmp)
    }

    fn append_line(path: &Path, line: &str) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;
        writeln!(file, "{}", line).map_err(|e| StorageError::io(path, e))?;
        file.sync_data().map_err(|e| StorageError::io(path, e))
    }

    fn truncate_to(path: &Path, len: u64) -> std::io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_data()
    }

    /// Prepare one row without touching its live file.
    fn stage(
        &self,
        on_disk: &HashMap<PathBuf, Vec<String>>,
        pending: &PendingRow<'_>,
    ) -> Result<Staged, StorageError> {
        let path = self.path_for(pending.key);
        let same_header = on_disk
            .get(&path)
            .is_some_and(|h| h.as_slice() == pending.headers);

        if same_header && path.is_file() {
            let len = fs::metadata(&path).map_err(|e| StorageError::io(&path, e))?.len();
            return Ok(Staged::Line {
                line: row_line(pending.headers, pending.row),
                path,
                len,
            });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let mut series = if path.is_file() {
            Self::read_series(&path, &pending.key.capture_set_id)?
        } else {
            Series::default()
        };
        series.merge_headers(pending.headers.iter().map(String::as_str));
        series.rows.push(pending.row.clone());

        let tmp = Self::write_tmp(&path, &series)?;
        Ok(Staged::Replace {
            path,
            tmp,
            headers: series.headers,
        })
    }

    /// Make one staged write live, recording how to take it back.
    fn commit(staged: &Staged, undo: &mut Vec<Undo>) -> Result<(), StorageError> {
        match staged {
            Staged::Line { path, line, len } => {
                if let Err(e) = Self::append_line(path, line) {
                    // Drop any partial line.
                    if let Err(te) = Self::truncate_to(path, *len) {
                        error!(path = %path.display(), error = %te, "Failed to trim partial log line");
                    }
                    return Err(e);
                }
                undo.push(Undo::Truncate {
                    path: path.clone(),
                    len: *len,
                });
            }
            Staged::Replace { path, tmp, .. } => {
                let backup = if path.is_file() {
                    let backup = path.with_extension("csv.bak");
                    fs::rename(path, &backup).map_err(|e| StorageError::io(path, e))?;
                    Some(backup)
                } else {
                    None
                };
                if let Err(e) = fs::rename(tmp, path) {
                    if let Some(backup) = &backup {
                        if let Err(re) = fs::rename(backup, path) {
                            error!(path = %path.display(), error = %re, "Failed to restore score log");
                        }
                    }
                    return Err(StorageError::io(path, e));
                }
                undo.push(Undo::Restore {
                    path: path.clone(),
                    backup,
                });
            }
        }
        Ok(())
    }

    /// Undo committed writes, newest first.
    fn roll_back(undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            let (path, result) = match step {
                Undo::Truncate { path, len } => {
                    let result = Self::truncate_to(&path, len);
                    (path, result)
                }
                Undo::Restore { path, backup: Some(backup) } => {
                    let result = fs::rename(&backup, &path);
                    (path, result)
                }
                Undo::Restore { path, backup: None } => {
                    let result = fs::remove_file(&path);
                    (path, result)
                }
            };
            match result {
                Ok(()) => warn!(path = %path.display(), "Score log write rolled back"),
                Err(e) => error!(path = %path.display(), error = %e, "Score log rollback failed"),
            }
        }
    }

    fn discard(staged: &[Staged]) {
        for entry in staged {
            if let Staged::Replace { tmp, .. } = entry {
                if tmp.exists() {
                    if let Err(e) = fs::remove_file(tmp) {
                        warn!(path = %tmp.display(), error = %e, "Failed to remove temp log");
                    }
                }
            }
        }
    }
}

/// A write prepared but not yet visible under the log's own name.
enum Staged {
    /// Append `line`; `len` is the size to cut back to.
    Line { path: PathBuf, line: String, len: u64 },
    /// Swap a fully written temp file in for the log.
    Replace {
        path: PathBuf,
        tmp: PathBuf,
        headers: Vec<String>,
    },
}

/// How to take back one committed write.
enum Undo {
    Truncate { path: PathBuf, len: u64 },
    Restore { path: PathBuf, backup: Option<PathBuf> },
}

impl LedgerStore for CsvLogStore {
    fn load(&self) -> Result<Vec<(SeriesKey, Series)>, StorageError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StorageError::io(&self.root, e))?;
        let mut on_disk = self.on_disk.lock().map_err(|_| StorageError::Poisoned)?;
        let mut loaded = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let Some(capture_set_id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            for mode in RmsMode::ALL {
                let path = dir.join(mode.file_name());
                if !path.exists() {
                    continue;
                }
                let series = Self::read_series(&path, &capture_set_id)?;
                debug!(path = %path.display(), rows = series.rows.len(), "Loaded score log");
                on_disk.insert(path, series.headers.clone());
                loaded.push((SeriesKey::new(&capture_set_id, mode), series));
            }
        }

        info!(root = %self.root.display(), series = loaded.len(), "Score logs loaded");
        Ok(loaded)
    }

    /// Every row of the batch is staged first. Appends are undone by
    /// truncation and replaced logs are restored from a backup, so a failure
    /// part way leaves each log as it was before the batch.
    fn append(&self, batch: &[PendingRow<'_>]) -> Result<(), StorageError> {
        let mut on_disk = self.on_disk.lock().map_err(|_| StorageError::Poisoned)?;

        let mut staged = Vec::with_capacity(batch.len());
        for pending in batch {
            match self.stage(&on_disk, pending) {
                Ok(entry) => staged.push(entry),
                Err(e) => {
                    Self::discard(&staged);
                    return Err(e);
                }
            }
        }

        let mut undo = Vec::with_capacity(staged.len());
        for entry in &staged {
            if let Err(e) = Self::commit(entry, &mut undo) {
                Self::roll_back(undo);
                Self::discard(&staged);
                return Err(e);
            }
        }

        for step in &undo {
            if let Undo::Restore { backup: Some(backup), .. } = step {
                if let Err(e) = fs::remove_file(backup) {
                    warn!(path = %backup.display(), error = %e, "Failed to remove log backup");
                }
            }
        }
        for entry in staged {
            if let Staged::Replace { path, headers, .. } = entry {
                info!(path = %path.display(), columns = headers.len(), "Score log header written");
                on_disk.insert(path, headers);
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "CsvLog"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(counter: u64, cells: &[(&str, f64)]) -> InterferenceScore {
        InterferenceScore {
            counter,
            capture_set_id: "HF_bands".to_string(),
            date: "2024-03-01".to_string(),
            time: "18:30".to_string(),
            note: "wet, windy".to_string(),
            scores: cells.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn headers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn pending<'a>(
        key: &'a SeriesKey,
        headers: &'a [String],
        row: &'a InterferenceScore,
    ) -> PendingRow<'a> {
        PendingRow { key, headers, row }
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("12.5"), Some(12.5));
        assert_eq!(parse_cell(" 0 "), Some(0.0));
        assert_eq!(parse_cell("-1"), None);
        assert_eq!(parse_cell("-1.0"), None);
        assert_eq!(parse_cell(""), None);
        assert_eq!(parse_cell("n/a"), None);
        assert_eq!(parse_cell("NaN"), None);
    }

    #[test]
    fn test_row_line_marks_absent_specs() {
        let headers = vec!["40m".to_string(), "20m".to_string()];
        let line = row_line(&headers, &row(7, &[("20m", 33.25)]));
        assert_eq!(line, "7,2024-03-01,18:30,wet; windy,-1,33.25");
    }

    #[test]
    fn test_header_widening_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvLogStore::new(dir.path()).unwrap();
        let key = SeriesKey::new("HF_bands", RmsMode::Standard);

        let narrow = headers(&["40m"]);
        store.append(&[pending(&key, &narrow, &row(1, &[("40m", 10.0)]))]).unwrap();

        let wide = headers(&["40m", "20m"]);
        store
            .append(&[pending(&key, &wide, &row(2, &[("40m", 11.0), ("20m", 5.5)]))])
            .unwrap();

        let text = fs::read_to_string(store.path_for(&key)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "counter,date,time,note,40m,20m");
        assert_eq!(lines[1], "1,2024-03-01,18:30,wet; windy,10,-1");
        assert_eq!(lines[2], "2,2024-03-01,18:30,wet; windy,11,5.5");
        assert!(!store.path_for(&key).with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_reload_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let key = SeriesKey::new("HF_bands", RmsMode::Truncated);
        let value = 83.010_299_956_639_81_f64 / 3.0;
        {
            let store = CsvLogStore::new(dir.path()).unwrap();
            let cols = headers(&["40m", "20m"]);
            store.append(&[pending(&key, &cols, &row(5, &[("40m", value)]))]).unwrap();
        }

        let store = CsvLogStore::new(dir.path()).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        let (k, s) = &loaded[0];
        assert_eq!(k, &key);
        assert_eq!(s.headers, vec!["40m".to_string(), "20m".to_string()]);
        assert_eq!(s.rows[0].counter, 5);
        assert_eq!(s.rows[0].scores.get("40m"), Some(value));
        assert_eq!(s.rows[0].scores.get("20m"), None);
        assert_eq!(s.rows[0].capture_set_id, "HF_bands");
    }

    #[test]
    fn test_malformed_header_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("X")).unwrap();
        fs::write(dir.path().join("X").join("rms_standard.csv"), "id,when\n1,2\n").unwrap();
        let store = CsvLogStore::new(dir.path()).unwrap();
        assert!(matches!(store.load(), Err(StorageError::Malformed { line: 1, .. })));
    }

    #[test]
    fn test_failed_batch_leaves_existing_logs_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvLogStore::new(dir.path()).unwrap();
        let std_key = SeriesKey::new("HF_bands", RmsMode::Standard);
        let trunc_key = SeriesKey::new("HF_bands", RmsMode::Truncated);
        let cols = headers(&["40m"]);

        let first = row(1, &[("40m", 10.0)]);
        store
            .append(&[pending(&std_key, &cols, &first), pending(&trunc_key, &cols, &first)])
            .unwrap();
        let std_before = fs::read_to_string(store.path_for(&std_key)).unwrap();

        // The truncated log can no longer be written.
        let trunc_path = store.path_for(&trunc_key);
        fs::remove_file(&trunc_path).unwrap();
        fs::create_dir(&trunc_path).unwrap();

        let second = row(2, &[("40m", 12.0)]);
        let result =
            store.append(&[pending(&std_key, &cols, &second), pending(&trunc_key, &cols, &second)]);
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(store.path_for(&std_key)).unwrap(), std_before);
        assert!(!trunc_path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_failed_first_batch_creates_no_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvLogStore::new(dir.path()).unwrap();
        let std_key = SeriesKey::new("HF_bands", RmsMode::Standard);
        let trunc_key = SeriesKey::new("HF_bands", RmsMode::Truncated);
        let cols = headers(&["40m", "20m"]);

        let trunc_path = store.path_for(&trunc_key);
        fs::create_dir_all(&trunc_path).unwrap();

        let first = row(1, &[("40m", 10.0)]);
        let result =
            store.append(&[pending(&std_key, &cols, &first), pending(&trunc_key, &cols, &first)]);
        assert!(result.is_err());

        let std_path = store.path_for(&std_key);
        assert!(!std_path.exists());
        assert!(!std_path.with_extension("csv.tmp").exists());
        assert!(!trunc_path.with_extension("csv.tmp").exists());
    }
}
