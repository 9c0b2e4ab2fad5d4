//! RMS Reducer
//!
//! Converts the selected dB readings of one capture spec into a single
//! interference percentage. The reduction is a mean over linear power
//! (not a root of squared amplitudes): `10*log10(mean(10^(db/10)))`,
//! normalized against the configured dB range.
//!
//! Truncated mode first caps every linear value at the 95th percentile so a
//! single strong narrowband carrier cannot dominate the score.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::AnalysisError;
use crate::types::{RmsMode, MAX_ABS_POWER_DB};

/// Percentile used to cap linear power in truncated mode.
pub const DEFAULT_TRUNCATION_PERCENTILE: f64 = 95.0;

pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

pub fn linear_to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

/// Percentile of already-sorted values with linear interpolation between
/// the two nearest ranks (`rank = p/100 * (n-1)`).
///
/// Returns NaN for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

// ============================================================================
// dB range
// ============================================================================

/// Dynamic range that maps to 0..100 %. Only constructible with `max > min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DbRange {
    min_db: f64,
    max_db: f64,
}

impl DbRange {
    pub fn new(min_db: f64, max_db: f64) -> Result<Self, AnalysisError> {
        // Also rejects NaN on either side.
        if !(max_db > min_db) {
            return Err(AnalysisError::InvalidRange { min_db, max_db });
        }
        Ok(Self { min_db, max_db })
    }

    pub fn min_db(&self) -> f64 {
        self.min_db
    }

    pub fn max_db(&self) -> f64 {
        self.max_db
    }

    /// Percentage of the range, clamped below at 0 and open above.
    pub fn percent(&self, db: f64) -> f64 {
        let pct = 100.0 * (db - self.min_db) / (self.max_db - self.min_db);
        pct.max(0.0)
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Full result of one reduction, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduction {
    pub percent: f64,
    pub rms_db: f64,
    /// Bins lowered to the cap (0 in standard mode).
    pub capped_bins: usize,
    /// Cap in dB (truncated mode only).
    pub cap_db: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmsReducer {
    range: DbRange,
    truncation_percentile: f64,
}

impl RmsReducer {
    pub fn new(range: DbRange) -> Self {
        Self {
            range,
            truncation_percentile: DEFAULT_TRUNCATION_PERCENTILE,
        }
    }

    pub fn with_truncation_percentile(mut self, percentile: f64) -> Self {
        self.truncation_percentile = percentile;
        self
    }

    pub fn range(&self) -> DbRange {
        self.range
    }

    pub fn reduce(&self, values_db: &[f64], mode: RmsMode) -> Result<f64, AnalysisError> {
        self.reduce_detailed(values_db, mode).map(|r| r.percent)
    }

    pub fn reduce_detailed(
        &self,
        values_db: &[f64],
        mode: RmsMode,
    ) -> Result<Reduction, AnalysisError> {
        if let Some(&power_db) = values_db.iter().find(|db| !(db.abs() <= MAX_ABS_POWER_DB)) {
            return Err(AnalysisError::PowerOutOfRange { power_db });
        }
        let mut linear: Vec<f64> = values_db.iter().map(|&db| db_to_linear(db)).collect();

        let mut capped_bins = 0;
        let mut cap_db = None;
        if mode == RmsMode::Truncated && !linear.is_empty() {
            let mut sorted = linear.clone();
            sorted.sort_by(f64::total_cmp);
            let cap = percentile(&sorted, self.truncation_percentile);
            for v in linear.iter_mut().filter(|v| **v > cap) {
                *v = cap;
                capped_bins += 1;
            }
            cap_db = Some(linear_to_db(cap));
        }

        // Mean of an empty slice is NaN, which fails the check as well.
        let mean_linear = linear.iter().mean();
        if !(mean_linear > 0.0) {
            return Err(AnalysisError::DegenerateInput { mean_linear });
        }

        let rms_db = linear_to_db(mean_linear);
        Ok(Reduction {
            percent: self.range.percent(rms_db),
            rms_db,
            capped_bins,
            cap_db,
        })
    }
}

/// One-shot reduction with the default truncation percentile.
pub fn reduce(
    values_db: &[f64],
    mode: RmsMode,
    min_db: f64,
    max_db: f64,
) -> Result<f64, AnalysisError> {
    RmsReducer::new(DbRange::new(min_db, max_db)?).reduce(values_db, mode)
}
