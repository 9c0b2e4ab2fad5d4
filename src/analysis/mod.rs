//! RMS Analysis Core
//!
//! Pure, synchronous numeric stages that turn one power spectrum into
//! interference scores and interpret the resulting time series:
//!
//! - `window`: spectral window selector (crop margins and artifact exclusions)
//! - `rms`: standard / truncated RMS reducer, normalized to a percentage
//! - `delta`: period-over-period change rows
//! - `severity`: Low/Medium/High/Critical classification and the
//!   runtime-adjustable threshold cell
//! - `diagnostics`: per-spectrum peak statistics for operator logs
//!
//! Nothing in here performs I/O or holds locks apart from `ThresholdCell`.

pub mod delta;
pub mod diagnostics;
pub mod rms;
pub mod severity;
pub mod window;

pub use delta::{cell_delta, delta};
pub use diagnostics::SpectrumDiagnostics;
pub use rms::{reduce, DbRange, Reduction, RmsReducer};
pub use severity::{
    classify, classify_delta, update_thresholds, DeltaDirection, DeltaSeverity, Severity,
    ThresholdCell, Thresholds,
};
pub use window::{select, select_bins, DcAnchor, ExclusionSet};

use thiserror::Error;

/// Failures of the numeric core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnalysisError {
    /// Window and exclusions leave nothing to score. A configuration problem.
    #[error("no scorable bins in window '{spec_id}' ({start_khz}-{end_khz} kHz) after exclusions")]
    EmptySelection {
        spec_id: String,
        start_khz: f64,
        end_khz: f64,
    },

    /// Mean linear power is not positive. Callers record 0%.
    #[error("mean linear power {mean_linear} is not positive")]
    DegenerateInput { mean_linear: f64 },

    /// A reading too large to convert to linear power.
    #[error("power {power_db} dB is outside the convertible range")]
    PowerOutOfRange { power_db: f64 },

    #[error("invalid dB range: max_db ({max_db}) must be greater than min_db ({min_db})")]
    InvalidRange { min_db: f64, max_db: f64 },
}
