//! QRM Ledger: RMS interference scoring for receiver spectrum recordings
//!
//! Turns averaged power spectra into per-band interference scores and keeps
//! them as an append-only time series per capture set.
//!
//! ## Architecture
//!
//! - **Analysis**: window selection, RMS reduction, deltas, severity bands
//! - **Storage**: in-memory ledger, tabular logs, global recording counter
//! - **Pipeline**: the scoring engine that ties a recording to the ledger
//! - **API**: read-only views of the ledger plus recording submission

pub mod analysis;
pub mod api;
pub mod config;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, QrmConfig};

// Re-export commonly used types
pub use types::{
    CaptureSet, CaptureSpecWindow, InterferenceScore, PowerSpectrum, Recording, RmsMode,
    SpecScores, SpectrumInput,
};

// Re-export analysis
pub use analysis::{DbRange, DcAnchor, ExclusionSet, RmsReducer, Severity, ThresholdCell, Thresholds};

// Re-export storage and engine
pub use pipeline::{EngineError, RecordingOutcome, RecordingSource, ScoringEngine};
pub use storage::{Ledger, StorageError};
