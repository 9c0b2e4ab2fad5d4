//! End-to-end scoring tests
//!
//! Recordings go through `ScoringEngine` with an in-memory ledger, and the
//! results are read back through the table and delta views.

use qrm_ledger::analysis::{DeltaDirection, Severity};
use qrm_ledger::types::TaggedSpectrum;
use qrm_ledger::{EngineError, QrmConfig, Recording, RmsMode, ScoringEngine, SpectrumInput};

/// Flat spectrum over 6990..=7210 kHz, covering the 40m window.
fn flat_40m(power_db: f64) -> SpectrumInput {
    SpectrumInput::Bins {
        bins: (6990..=7210).map(|f| (f64::from(f), power_db)).collect(),
    }
}

fn recording(time: &str, spectra: Vec<(&str, SpectrumInput)>) -> Recording {
    Recording {
        capture_set_id: "HF_bands".to_string(),
        date: "2024-03-01".to_string(),
        time: time.to_string(),
        note: String::new(),
        spectra: spectra
            .into_iter()
            .map(|(id, spectrum)| TaggedSpectrum {
                spec_id: id.to_string(),
                spectrum,
            })
            .collect(),
    }
}

fn engine() -> ScoringEngine {
    ScoringEngine::in_memory(&QrmConfig::default()).unwrap()
}

#[test]
fn flat_spectrum_scores_its_level_in_both_modes() {
    let engine = engine();
    let outcome = engine
        .score_recording(recording("10:00", vec![("40m", flat_40m(-74.0))]))
        .unwrap();

    assert_eq!(outcome.counter, 1);
    assert_eq!(outcome.scored.len(), 1);
    let spec = &outcome.scored[0];
    assert!((spec.standard - 44.0).abs() < 1e-9, "standard = {}", spec.standard);
    assert!((spec.truncated - 44.0).abs() < 1e-9, "truncated = {}", spec.truncated);
    assert_eq!(spec.standard_severity, Severity::High);
    assert!(!spec.narrowband_suspected);

    // Every other band had no spectrum.
    assert_eq!(outcome.missing.len(), 6);
    assert!(outcome.failures.is_empty());
}

#[test]
fn narrowband_carrier_pulls_standard_above_truncated() {
    let engine = engine();
    let mut bins: Vec<(f64, f64)> = (6990..=7210).map(|f| (f64::from(f), -80.0)).collect();
    for bin in bins.iter_mut().filter(|(f, _)| (7100.0..=7102.0).contains(f)) {
        bin.1 = -40.0;
    }
    let outcome = engine
        .score_recording(recording("10:00", vec![("40m", SpectrumInput::Bins { bins })]))
        .unwrap();

    let spec = &outcome.scored[0];
    assert!(spec.standard > spec.truncated);
    assert!(spec.narrowband_suspected);
}

#[test]
fn both_modes_share_one_counter_per_recording() {
    let engine = engine();
    for (i, time) in ["10:00", "11:00", "12:00"].iter().enumerate() {
        let outcome = engine
            .score_recording(recording(time, vec![("40m", flat_40m(-80.0 + i as f64))]))
            .unwrap();
        assert_eq!(outcome.counter, i as u64 + 1);
    }

    for mode in RmsMode::ALL {
        let table = engine.table("HF_bands", mode, None).unwrap();
        let counters: Vec<u64> = table.rows.iter().map(|r| r.counter).collect();
        assert_eq!(counters, vec![3, 2, 1], "newest first in {mode}");
    }
}

#[test]
fn delta_table_compares_consecutive_recordings() {
    let engine = engine();
    engine
        .score_recording(recording("10:00", vec![("40m", flat_40m(-80.0))]))
        .unwrap();
    engine
        .score_recording(recording("11:00", vec![("40m", flat_40m(-75.0))]))
        .unwrap();
    engine
        .score_recording(recording("12:00", vec![("40m", flat_40m(-77.5))]))
        .unwrap();

    let table = engine.delta_table("HF_bands", RmsMode::Standard, Some(10)).unwrap();
    assert_eq!(table.rows.len(), 2);

    let col = table.headers.iter().position(|h| h == "40m").unwrap();
    // 20 % -> 40 % -> 30 % of the 25 dB range, newest delta first
    let newest = table.rows[0].scores.get("40m").unwrap();
    let older = table.rows[1].scores.get("40m").unwrap();
    assert!((newest + 10.0).abs() < 1e-9, "newest delta = {newest}");
    assert!((older - 20.0).abs() < 1e-9, "older delta = {older}");
    assert_eq!(table.severities[0][col].direction, DeltaDirection::Decrease);
    assert_eq!(table.severities[1][col].direction, DeltaDirection::Increase);
    // 20 against 0.3 * (20/40/50) = 6/12/15 is Critical
    assert_eq!(table.severities[1][col].band, Severity::Critical);
}

#[test]
fn unknown_capture_set_is_rejected_without_consuming_a_counter() {
    let engine = engine();
    let mut rec = recording("10:00", vec![("40m", flat_40m(-74.0))]);
    rec.capture_set_id = "VHF".to_string();
    assert!(matches!(
        engine.score_recording(rec),
        Err(EngineError::UnknownCaptureSet(_))
    ));
    assert_eq!(engine.ledger().last_counter().unwrap(), 0);
}

#[test]
fn malformed_spectrum_leaves_column_empty_and_keeps_others() {
    let engine = engine();
    let bad = SpectrumInput::Bins {
        bins: vec![(14100.0, -70.0), (14000.0, -70.0)],
    };
    let outcome = engine
        .score_recording(recording("10:00", vec![("40m", flat_40m(-74.0)), ("20m", bad)]))
        .unwrap();

    assert_eq!(outcome.scored.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].spec_id, "20m");

    let table = engine.table("HF_bands", RmsMode::Standard, None).unwrap();
    assert!(table.rows[0].scores.get("20m").is_none());
    assert!(table.rows[0].scores.get("40m").is_some());
}
