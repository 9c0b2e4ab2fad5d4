//! Spectral Window Selector
//!
//! Picks the bins of a spectrum that are eligible for scoring: inside the
//! capture spec's core window and outside every exclusion interval.

use serde::{Deserialize, Serialize};

use super::AnalysisError;
use crate::types::{CaptureSpecWindow, PowerSpectrum};

/// Half-width of the receiver DC artifact band.
pub const DEFAULT_DC_HALF_WIDTH_KHZ: f64 = 3.0;

/// Tolerance applied around each configured exclusion frequency.
pub const DEFAULT_EXCLUSION_HALF_WIDTH_KHZ: f64 = 1.0;

/// Where the DC artifact band is centered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DcAnchor {
    /// At each capture's tuned center frequency, i.e. 0 Hz of its baseband.
    #[default]
    Baseband,
    /// At 0 kHz of the receiver's RF frequency axis.
    Absolute,
}

/// Frequency intervals that are never scored.
///
/// Built once from configuration and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionSet {
    dc_half_width_khz: f64,
    dc_anchor: DcAnchor,
    /// Closed `(low, high)` intervals around configured points.
    points: Vec<(f64, f64)>,
}

impl ExclusionSet {
    pub fn new(
        dc_half_width_khz: f64,
        dc_anchor: DcAnchor,
        points_khz: &[f64],
        point_half_width_khz: f64,
    ) -> Self {
        let points = points_khz
            .iter()
            .map(|&f| (f - point_half_width_khz, f + point_half_width_khz))
            .collect();
        Self {
            dc_half_width_khz,
            dc_anchor,
            points,
        }
    }

    /// Only the DC band, no configured points.
    pub fn dc_only(dc_anchor: DcAnchor) -> Self {
        Self::new(DEFAULT_DC_HALF_WIDTH_KHZ, dc_anchor, &[], 0.0)
    }

    pub fn dc_anchor(&self) -> DcAnchor {
        self.dc_anchor
    }

    fn dc_center(&self, window: &CaptureSpecWindow) -> f64 {
        match self.dc_anchor {
            DcAnchor::Baseband => window.center_khz,
            DcAnchor::Absolute => 0.0,
        }
    }

    /// True if `freq_khz` falls inside any exclusion interval for `window`.
    pub fn excludes(&self, freq_khz: f64, window: &CaptureSpecWindow) -> bool {
        if (freq_khz - self.dc_center(window)).abs() <= self.dc_half_width_khz {
            return true;
        }
        self.points
            .iter()
            .any(|&(lo, hi)| freq_khz >= lo && freq_khz <= hi)
    }
}

/// Bins eligible for scoring, as `(freq_khz, power_db)` pairs in frequency order.
pub fn select_bins(
    spectrum: &PowerSpectrum,
    window: &CaptureSpecWindow,
    exclusions: &ExclusionSet,
) -> Result<Vec<(f64, f64)>, AnalysisError> {
    let kept: Vec<(f64, f64)> = spectrum
        .bins()
        .iter()
        .copied()
        .filter(|&(f, _)| window.contains(f) && !exclusions.excludes(f, window))
        .collect();

    if kept.is_empty() {
        return Err(AnalysisError::EmptySelection {
            spec_id: window.spec_id.clone(),
            start_khz: window.core_start_khz,
            end_khz: window.core_end_khz,
        });
    }
    Ok(kept)
}

/// Power values (dB) of the eligible bins, in frequency order.
pub fn select(
    spectrum: &PowerSpectrum,
    window: &CaptureSpecWindow,
    exclusions: &ExclusionSet,
) -> Result<Vec<f64>, AnalysisError> {
    Ok(select_bins(spectrum, window, exclusions)?
        .into_iter()
        .map(|(_, db)| db)
        .collect())
}
