//! Scoring engine: wires selector -> reducer -> ledger for one recording

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::analysis::diagnostics::narrowband_suspected;
use crate::analysis::{
    self, classify, classify_delta, AnalysisError, DbRange, DeltaSeverity, ExclusionSet,
    RmsReducer, Severity, SpectrumDiagnostics, ThresholdCell,
};
use crate::config::QrmConfig;
use crate::storage::{
    CsvLogStore, Ledger, LedgerTable, MemoryCounter, MemoryStore, SledCounter, StorageError,
};
use crate::types::{
    CaptureSet, CaptureSpecWindow, InterferenceScore, PowerSpectrum, Recording, RmsMode,
    SpecScores,
};

/// Counter database name inside the data directory.
pub const COUNTER_DB: &str = "counter.db";

#[derive(Debug, Error)]
pub enum EngineError {
    /// The configured dB range cannot be normalized against.
    #[error(transparent)]
    InvalidRange(AnalysisError),

    #[error("unknown capture set '{0}'")]
    UnknownCaptureSet(String),

    #[error("invalid recording: {0}")]
    InvalidRecording(String),

    #[error("ledger storage failed: {0}")]
    Storage(#[from] StorageError),
}

// ============================================================================
// Outcome
// ============================================================================

/// Scores of one capture spec in one recording.
#[derive(Debug, Clone, Serialize)]
pub struct SpecOutcome {
    pub spec_id: String,
    pub standard: f64,
    pub truncated: f64,
    pub standard_severity: Severity,
    pub truncated_severity: Severity,
    /// Scored as the 0 % sentinel because the input had no power.
    pub degenerate: bool,
    pub narrowband_suspected: bool,
}

/// A capture spec that could not be scored. Its column stays empty.
#[derive(Debug, Clone, Serialize)]
pub struct SpecFailure {
    pub spec_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingOutcome {
    pub counter: u64,
    pub capture_set_id: String,
    pub date: String,
    pub time: String,
    pub scored: Vec<SpecOutcome>,
    pub failures: Vec<SpecFailure>,
    /// Specs of the set with no spectrum in this recording.
    pub missing: Vec<String>,
    /// Spectra whose spec id is not part of the set.
    pub ignored: Vec<String>,
}

/// Delta view with a band per cell.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeltaTable {
    pub headers: Vec<String>,
    pub rows: Vec<InterferenceScore>,
    /// `severities[i][j]` classifies `rows[i]`'s delta for `headers[j]`.
    pub severities: Vec<Vec<DeltaSeverity>>,
}

#[derive(Debug, Default)]
pub struct EngineStats {
    recordings_scored: AtomicU64,
    specs_scored: AtomicU64,
    spec_failures: AtomicU64,
    degenerate_scores: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineStatsSnapshot {
    pub recordings_scored: u64,
    pub specs_scored: u64,
    pub spec_failures: u64,
    pub degenerate_scores: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            recordings_scored: self.recordings_scored.load(Ordering::Relaxed),
            specs_scored: self.specs_scored.load(Ordering::Relaxed),
            spec_failures: self.spec_failures.load(Ordering::Relaxed),
            degenerate_scores: self.degenerate_scores.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct ScoringEngine {
    min_db: f64,
    max_db: f64,
    truncation_percentile: f64,
    exclusions: ExclusionSet,
    capture_sets: Vec<CaptureSet>,
    ledger: Arc<Ledger>,
    thresholds: Arc<ThresholdCell>,
    stats: EngineStats,
}

/// Result of scoring one spec in both modes.
enum SpecScore {
    Scored { standard: f64, truncated: f64, degenerate: bool },
    Failed(String),
}

impl ScoringEngine {
    pub fn new(config: &QrmConfig, ledger: Arc<Ledger>, thresholds: Arc<ThresholdCell>) -> Self {
        let capture_sets = config.capture_sets();
        info!(
            station = %config.station.name,
            capture_sets = capture_sets.len(),
            min_db = config.levels.min_db,
            max_db = config.levels.max_db,
            dc_anchor = ?config.analysis.dc_anchor,
            "Scoring engine initialized"
        );
        Self {
            min_db: config.levels.min_db,
            max_db: config.levels.max_db,
            truncation_percentile: config.analysis.truncation_percentile,
            exclusions: config.exclusion_set(),
            capture_sets,
            ledger,
            thresholds,
            stats: EngineStats::default(),
        }
    }

    /// Durable engine: tabular logs and the sled counter under
    /// `storage.data_dir`, ledger rebuilt from the logs.
    pub fn open(config: &QrmConfig) -> Result<Self, StorageError> {
        let data_dir = &config.storage.data_dir;
        let store = CsvLogStore::new(data_dir)?;
        let counter = SledCounter::open(data_dir.join(COUNTER_DB))?;
        let ledger = Ledger::open(Box::new(store), Box::new(counter))?;
        Ok(Self::with_ledger(config, ledger))
    }

    /// Non-durable engine for tests and dry runs.
    pub fn in_memory(config: &QrmConfig) -> Result<Self, StorageError> {
        let ledger = Ledger::open(Box::new(MemoryStore::new()), Box::new(MemoryCounter::new()))?;
        Ok(Self::with_ledger(config, ledger))
    }

    fn with_ledger(config: &QrmConfig, ledger: Ledger) -> Self {
        let thresholds = ThresholdCell::new(config.initial_thresholds(), config.thresholds.delta_scale);
        Self::new(config, Arc::new(ledger), Arc::new(thresholds))
    }

    pub fn capture_sets(&self) -> &[CaptureSet] {
        &self.capture_sets
    }

    pub fn capture_set(&self, id: &str) -> Option<&CaptureSet> {
        self.capture_sets.iter().find(|s| s.id == id)
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn thresholds(&self) -> &Arc<ThresholdCell> {
        &self.thresholds
    }

    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Score one recording and append both rows to the ledger.
    pub fn score_recording(&self, recording: Recording) -> Result<RecordingOutcome, EngineError> {
        // STAGE 1: reject before any scoring
        let range = DbRange::new(self.min_db, self.max_db).map_err(|e| {
            error!(error = %e, "Recording rejected: invalid dB range");
            EngineError::InvalidRange(e)
        })?;
        let set = self
            .capture_set(&recording.capture_set_id)
            .ok_or_else(|| EngineError::UnknownCaptureSet(recording.capture_set_id.clone()))?;
        recording
            .validate_stamp()
            .map_err(EngineError::InvalidRecording)?;

        let reducer = RmsReducer::new(range).with_truncation_percentile(self.truncation_percentile);
        let meta = recording.meta();

        let ignored: Vec<String> = recording
            .spectra
            .iter()
            .filter(|s| set.window(&s.spec_id).is_none())
            .map(|s| s.spec_id.clone())
            .collect();
        for spec_id in &ignored {
            warn!(capture_set = %set.id, spec = %spec_id, "Spectrum for unknown spec ignored");
        }

        let mut standard = SpecScores::new();
        let mut truncated = SpecScores::new();
        let mut failures = Vec::new();
        let mut missing = Vec::new();
        let mut degenerate_specs = Vec::new();

        // STAGE 2-3: per spec, declaration order
        for window in &set.windows {
            let Some(tagged) = recording.spectra.iter().find(|s| s.spec_id == window.spec_id) else {
                debug!(capture_set = %set.id, spec = %window.spec_id, "No spectrum for spec, column left empty");
                missing.push(window.spec_id.clone());
                continue;
            };

            let outcome = match PowerSpectrum::try_from(tagged.spectrum.clone()) {
                Ok(spectrum) => self.score_spec(&reducer, &spectrum, window),
                Err(e) => SpecScore::Failed(format!("malformed spectrum: {e}")),
            };

            match outcome {
                SpecScore::Scored {
                    standard: s,
                    truncated: t,
                    degenerate,
                } => {
                    standard.insert(&window.spec_id, s);
                    truncated.insert(&window.spec_id, t);
                    if degenerate {
                        degenerate_specs.push(window.spec_id.clone());
                    }
                }
                SpecScore::Failed(reason) => {
                    error!(capture_set = %set.id, spec = %window.spec_id, reason = %reason, "Capture spec not scored");
                    failures.push(SpecFailure {
                        spec_id: window.spec_id.clone(),
                        reason,
                    });
                }
            }
        }

        // STAGE 4: ledger append
        let columns = set.spec_ids();
        let counter = self
            .ledger
            .append_recording(&meta, &columns, standard.clone(), truncated.clone())?;

        // STAGE 5: classification
        let thresholds = self.thresholds.snapshot();
        let scored: Vec<SpecOutcome> = standard
            .iter()
            .filter_map(|(spec_id, s)| {
                let t = truncated.get(spec_id)?;
                Some(SpecOutcome {
                    spec_id: spec_id.to_string(),
                    standard: s,
                    truncated: t,
                    standard_severity: classify(s, &thresholds),
                    truncated_severity: classify(t, &thresholds),
                    degenerate: degenerate_specs.iter().any(|d| d == spec_id),
                    narrowband_suspected: narrowband_suspected(s, t),
                })
            })
            .collect();

        self.stats.recordings_scored.fetch_add(1, Ordering::Relaxed);
        self.stats
            .specs_scored
            .fetch_add(scored.len() as u64, Ordering::Relaxed);
        self.stats
            .spec_failures
            .fetch_add(failures.len() as u64, Ordering::Relaxed);
        self.stats
            .degenerate_scores
            .fetch_add(degenerate_specs.len() as u64, Ordering::Relaxed);

        info!(
            counter,
            capture_set = %set.id,
            date = %meta.date,
            time = %meta.time,
            scored = scored.len(),
            failed = failures.len(),
            missing = missing.len(),
            avg_standard = standard.average().unwrap_or(0.0),
            avg_truncated = truncated.average().unwrap_or(0.0),
            "Recording scored"
        );

        Ok(RecordingOutcome {
            counter,
            capture_set_id: set.id.clone(),
            date: meta.date,
            time: meta.time,
            scored,
            failures,
            missing,
            ignored,
        })
    }

    fn score_spec(
        &self,
        reducer: &RmsReducer,
        spectrum: &PowerSpectrum,
        window: &CaptureSpecWindow,
    ) -> SpecScore {
        let bins = match analysis::select_bins(spectrum, window, &self.exclusions) {
            Ok(bins) => bins,
            Err(e) => return SpecScore::Failed(e.to_string()),
        };
        let values: Vec<f64> = bins.iter().map(|b| b.1).collect();

        let mut degenerate = false;
        let mut reduce = |mode: RmsMode| match reducer.reduce_detailed(&values, mode) {
            Ok(r) => Ok(Some(r)),
            Err(AnalysisError::DegenerateInput { mean_linear }) => {
                warn!(spec = %window.spec_id, mode = %mode, mean_linear, "Degenerate input, recording 0%");
                degenerate = true;
                Ok(None)
            }
            Err(e) => Err(e),
        };

        let (standard, truncated) = match (reduce(RmsMode::Standard), reduce(RmsMode::Truncated)) {
            (Ok(s), Ok(t)) => (s, t),
            (Err(e), _) | (_, Err(e)) => return SpecScore::Failed(e.to_string()),
        };

        if let Some(diag) = SpectrumDiagnostics::compute(&bins) {
            debug!(
                spec = %window.spec_id,
                bins = diag.bins,
                strongest_khz = diag.strongest.0,
                strongest_db = diag.strongest.1,
                weakest_khz = diag.weakest.0,
                weakest_db = diag.weakest.1,
                median_db = diag.median_db,
                peak_to_median_db = diag.peak_to_median_db(),
                capped_bins = truncated.map_or(0, |t| t.capped_bins),
                cap_db = ?truncated.and_then(|t| t.cap_db),
                strong_peaks = ?diag.strong_peaks,
                "Spectrum diagnostics"
            );
        }

        let s = standard.map_or(0.0, |r| r.percent);
        let t = truncated.map_or(0.0, |r| r.percent);
        if narrowband_suspected(s, t) {
            info!(
                spec = %window.spec_id,
                standard = s,
                truncated = t,
                "Large standard/truncated gap, narrowband interference suspected"
            );
        }

        SpecScore::Scored {
            standard: s,
            truncated: t,
            degenerate,
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// A set is queryable if configured or present in the ledger.
    fn ensure_known(&self, capture_set_id: &str) -> Result<(), EngineError> {
        let known = self.capture_set(capture_set_id).is_some()
            || RmsMode::ALL
                .iter()
                .any(|&m| self.ledger.row_count(capture_set_id, m) > 0);
        if known {
            Ok(())
        } else {
            Err(EngineError::UnknownCaptureSet(capture_set_id.to_string()))
        }
    }

    /// Header list plus newest-first rows.
    pub fn table(
        &self,
        capture_set_id: &str,
        mode: RmsMode,
        limit: Option<usize>,
    ) -> Result<LedgerTable, EngineError> {
        self.ensure_known(capture_set_id)?;
        let mut table = self.ledger.table(capture_set_id, mode, limit);
        if table.headers.is_empty() {
            if let Some(set) = self.capture_set(capture_set_id) {
                table.headers = set.spec_ids();
            }
        }
        Ok(table)
    }

    /// Newest-first delta rows, at most `limit` of them.
    pub fn delta_table(
        &self,
        capture_set_id: &str,
        mode: RmsMode,
        limit: Option<usize>,
    ) -> Result<DeltaTable, EngineError> {
        let table = self.table(capture_set_id, mode, limit.map(|n| n.saturating_add(1)))?;
        let rows = analysis::delta(&table.rows, &table.headers);

        let thresholds = self.thresholds.snapshot();
        let scale = self.thresholds.delta_scale();
        let severities = rows
            .iter()
            .map(|row| {
                table
                    .headers
                    .iter()
                    .map(|h| classify_delta(row.scores.get(h).unwrap_or(0.0), &thresholds, scale))
                    .collect()
            })
            .collect();

        Ok(DeltaTable {
            headers: table.headers,
            rows,
            severities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{DcAnchor, Thresholds};
    use crate::config::{CaptureSetConfig, CaptureSpecConfig};
    use crate::types::{SpectrumInput, TaggedSpectrum};

    fn config() -> QrmConfig {
        let mut config = QrmConfig::default();
        config.analysis.dc_anchor = DcAnchor::Absolute;
        config.capture_sets = vec![CaptureSetConfig {
            id: "test".to_string(),
            specs: vec![
                CaptureSpecConfig {
                    id: "a".to_string(),
                    center_khz: 1000.0,
                    start_khz: 1000.0,
                    end_khz: 1010.0,
                },
                CaptureSpecConfig {
                    id: "b".to_string(),
                    center_khz: 2000.0,
                    start_khz: 2000.0,
                    end_khz: 2010.0,
                },
            ],
        }];
        config
    }

    fn engine(config: &QrmConfig) -> ScoringEngine {
        let ledger = Ledger::open(Box::new(MemoryStore::new()), Box::new(MemoryCounter::new())).unwrap();
        ScoringEngine::new(
            config,
            Arc::new(ledger),
            Arc::new(ThresholdCell::new(Thresholds::default(), 0.3)),
        )
    }

    fn flat(start: f64, db: f64) -> SpectrumInput {
        SpectrumInput::Bins {
            bins: (0..=10).map(|i| (start + i as f64, db)).collect(),
        }
    }

    fn recording(spectra: Vec<(&str, SpectrumInput)>) -> Recording {
        Recording {
            capture_set_id: "test".to_string(),
            date: "2024-03-01".to_string(),
            time: "18:30".to_string(),
            note: "line1\nline2, more".to_string(),
            spectra: spectra
                .into_iter()
                .map(|(id, spectrum)| TaggedSpectrum {
                    spec_id: id.to_string(),
                    spectrum,
                })
                .collect(),
        }
    }

    #[test]
    fn test_scores_both_specs_and_appends_two_rows() {
        let e = engine(&config());
        let out = e
            .score_recording(recording(vec![("a", flat(1000.0, -74.0)), ("b", flat(2000.0, -60.0))]))
            .unwrap();
        assert_eq!(out.counter, 1);
        assert_eq!(out.scored.len(), 2);
        assert!((out.scored[0].standard - 44.0).abs() < 1e-9);
        assert_eq!(out.scored[0].standard_severity, Severity::High);
        assert!((out.scored[1].standard - 100.0).abs() < 1e-9);
        assert_eq!(out.scored[1].truncated_severity, Severity::Critical);

        let s = e.ledger().latest("test", RmsMode::Standard, 10);
        let t = e.ledger().latest("test", RmsMode::Truncated, 10);
        assert_eq!(s.len(), 1);
        assert_eq!(t.len(), 1);
        assert_eq!(s[0].counter, t[0].counter);
        assert_eq!(s[0].note, "line1 line2; more");
    }

    #[test]
    fn test_missing_spectrum_leaves_column_sparse() {
        let e = engine(&config());
        let out = e
            .score_recording(recording(vec![("b", flat(2000.0, -70.0)), ("zz", flat(0.0, -70.0))]))
            .unwrap();
        assert_eq!(out.missing, vec!["a".to_string()]);
        assert_eq!(out.ignored, vec!["zz".to_string()]);
        let table = e.table("test", RmsMode::Standard, None).unwrap();
        assert_eq!(table.headers, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(table.rows[0].scores.get("a"), None);
        assert!(table.rows[0].scores.get("b").is_some());
    }

    #[test]
    fn test_empty_selection_fails_one_spec_only() {
        let mut config = config();
        // Mask the whole of spec "a".
        config.analysis.exclude_freqs_khz = vec![1005.0];
        config.analysis.exclusion_half_width_khz = 6.0;
        let e = engine(&config);
        let out = e
            .score_recording(recording(vec![("a", flat(1000.0, -70.0)), ("b", flat(2000.0, -70.0))]))
            .unwrap();
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].spec_id, "a");
        assert_eq!(out.scored.len(), 1);
        let row = &e.ledger().latest("test", RmsMode::Truncated, 1)[0];
        assert_eq!(row.scores.get("a"), None, "empty selection must not be scored as 0");
        assert!(row.scores.get("b").is_some());
    }

    #[test]
    fn test_degenerate_input_records_zero() {
        let e = engine(&config());
        let silent = SpectrumInput::Bins {
            bins: (0..=10).map(|i| (1000.0 + i as f64, -1.0e6)).collect(),
        };
        let out = e.score_recording(recording(vec![("a", silent)])).unwrap();
        assert_eq!(out.scored.len(), 1);
        assert!(out.scored[0].degenerate);
        assert_eq!(out.scored[0].standard, 0.0);
        assert_eq!(e.stats().degenerate_scores, 1);
    }

    #[test]
    fn test_invalid_range_blocks_recording() {
        let mut config = config();
        config.levels.max_db = config.levels.min_db - 1.0;
        let e = engine(&config);
        let err = e
            .score_recording(recording(vec![("a", flat(1000.0, -70.0))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange(_)));
        assert_eq!(e.ledger().row_count("test", RmsMode::Standard), 0);
    }

    #[test]
    fn test_unknown_capture_set_and_bad_time() {
        let e = engine(&config());
        let mut r = recording(vec![]);
        r.capture_set_id = "nope".to_string();
        assert!(matches!(e.score_recording(r), Err(EngineError::UnknownCaptureSet(_))));

        let mut r = recording(vec![]);
        r.time = "1830".to_string();
        assert!(matches!(e.score_recording(r), Err(EngineError::InvalidRecording(_))));
        assert!(matches!(e.table("nope", RmsMode::Standard, None), Err(EngineError::UnknownCaptureSet(_))));
    }

    #[test]
    fn test_delta_table_classifies_cells() {
        let e = engine(&config());
        e.score_recording(recording(vec![("a", flat(1000.0, -80.0))])).unwrap();
        e.score_recording(recording(vec![("a", flat(1000.0, -72.5))])).unwrap();
        e.score_recording(recording(vec![("a", flat(1000.0, -75.0))])).unwrap();

        let d = e.delta_table("test", RmsMode::Standard, None).unwrap();
        assert_eq!(d.rows.len(), 2);
        assert_eq!(d.rows[0].counter, 3);
        // 40 % - 50 % = -10 -> |10| in [6, 12) -> Medium, decreasing
        assert!((d.rows[0].scores.get("a").unwrap() + 10.0).abs() < 1e-9);
        assert_eq!(d.severities[0][0].band, Severity::Medium);
        assert_eq!(d.severities[0][0].direction, analysis::DeltaDirection::Decrease);

        let limited = e.delta_table("test", RmsMode::Standard, Some(1)).unwrap();
        assert_eq!(limited.rows.len(), 1);
    }
}
