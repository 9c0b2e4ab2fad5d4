//! Power spectra and the capture windows they are scored against

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest accepted |power| in dB. Linear power of anything beyond this
/// stops being meaningful long before `10^(db/10)` overflows `f64`.
pub const MAX_ABS_POWER_DB: f64 = 1000.0;

// ============================================================================
// Errors
// ============================================================================

/// Malformed spectrum input from the acquisition side.
#[derive(Debug, Error, PartialEq)]
pub enum SpectrumError {
    #[error("spectrum has no bins")]
    Empty,

    #[error("bin {index} is not finite (freq={freq_khz}, power={power_db})")]
    NonFinite {
        index: usize,
        freq_khz: f64,
        power_db: f64,
    },

    #[error("frequencies must increase monotonically (bin {index}: {freq_khz} kHz after {previous_khz} kHz)")]
    NotMonotonic {
        index: usize,
        freq_khz: f64,
        previous_khz: f64,
    },

    #[error("bin {index} power {power_db} dB is outside +/-1000 dB")]
    PowerOutOfRange { index: usize, power_db: f64 },

    #[error("span must be > 0, got {0} kHz")]
    InvalidSpan(f64),

    #[error("waterfall frame {index} has {len} bins, expected {expected}")]
    FrameLengthMismatch {
        index: usize,
        len: usize,
        expected: usize,
    },
}

// ============================================================================
// Power Spectrum
// ============================================================================

/// One recording's averaged power per frequency bin.
///
/// Bins are `(frequency_khz, power_db)` pairs with strictly increasing
/// frequency. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSpectrum {
    bins: Vec<(f64, f64)>,
}

impl PowerSpectrum {
    /// Build a spectrum from explicit bins, checking ordering and finiteness.
    pub fn new(bins: Vec<(f64, f64)>) -> Result<Self, SpectrumError> {
        if bins.is_empty() {
            return Err(SpectrumError::Empty);
        }
        for (index, &(freq_khz, power_db)) in bins.iter().enumerate() {
            if !freq_khz.is_finite() || !power_db.is_finite() {
                return Err(SpectrumError::NonFinite {
                    index,
                    freq_khz,
                    power_db,
                });
            }
            if power_db.abs() > MAX_ABS_POWER_DB {
                return Err(SpectrumError::PowerOutOfRange { index, power_db });
            }
            if index > 0 {
                let previous_khz = bins[index - 1].0;
                if freq_khz <= previous_khz {
                    return Err(SpectrumError::NotMonotonic {
                        index,
                        freq_khz,
                        previous_khz,
                    });
                }
            }
        }
        Ok(Self { bins })
    }

    /// Build a spectrum from an FFT output with evenly spaced bins.
    ///
    /// Bin `i` sits at `center - span/2 + i * span/n`.
    pub fn from_uniform(
        center_khz: f64,
        span_khz: f64,
        power_db: &[f64],
    ) -> Result<Self, SpectrumError> {
        if !(span_khz > 0.0) || !span_khz.is_finite() {
            return Err(SpectrumError::InvalidSpan(span_khz));
        }
        if power_db.is_empty() {
            return Err(SpectrumError::Empty);
        }
        let start_khz = center_khz - span_khz / 2.0;
        let khz_per_bin = span_khz / power_db.len() as f64;
        let bins = power_db
            .iter()
            .enumerate()
            .map(|(i, &p)| (start_khz + i as f64 * khz_per_bin, p))
            .collect();
        Self::new(bins)
    }

    /// Average several FFT frames (in dB) into one uniform spectrum.
    pub fn from_waterfall(
        center_khz: f64,
        span_khz: f64,
        frames: &[Vec<f64>],
    ) -> Result<Self, SpectrumError> {
        let expected = frames.first().map(Vec::len).ok_or(SpectrumError::Empty)?;
        let mut sums = vec![0.0_f64; expected];
        for (index, frame) in frames.iter().enumerate() {
            if frame.len() != expected {
                return Err(SpectrumError::FrameLengthMismatch {
                    index,
                    len: frame.len(),
                    expected,
                });
            }
            for (acc, &v) in sums.iter_mut().zip(frame) {
                *acc += v;
            }
        }
        let n = frames.len() as f64;
        let averaged: Vec<f64> = sums.into_iter().map(|s| s / n).collect();
        Self::from_uniform(center_khz, span_khz, &averaged)
    }

    pub fn bins(&self) -> &[(f64, f64)] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// Wire form of a spectrum as delivered by the acquisition pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpectrumInput {
    /// Explicit `[freq_khz, power_db]` pairs.
    Bins { bins: Vec<(f64, f64)> },
    /// Several FFT frames to be averaged.
    Waterfall {
        center_khz: f64,
        span_khz: f64,
        frames: Vec<Vec<f64>>,
    },
    /// One averaged FFT frame.
    Uniform {
        center_khz: f64,
        span_khz: f64,
        power_db: Vec<f64>,
    },
}

impl TryFrom<SpectrumInput> for PowerSpectrum {
    type Error = SpectrumError;

    fn try_from(input: SpectrumInput) -> Result<Self, Self::Error> {
        match input {
            SpectrumInput::Bins { bins } => Self::new(bins),
            SpectrumInput::Uniform {
                center_khz,
                span_khz,
                power_db,
            } => Self::from_uniform(center_khz, span_khz, &power_db),
            SpectrumInput::Waterfall {
                center_khz,
                span_khz,
                frames,
            } => Self::from_waterfall(center_khz, span_khz, &frames),
        }
    }
}

// ============================================================================
// Capture Windows
// ============================================================================

/// Scoring window of one capture spec, crop margins already removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSpecWindow {
    pub spec_id: String,
    pub core_start_khz: f64,
    pub core_end_khz: f64,
    pub center_khz: f64,
}

impl CaptureSpecWindow {
    /// Returns `None` unless `core_start_khz < core_end_khz`.
    pub fn new(spec_id: &str, core_start_khz: f64, core_end_khz: f64, center_khz: f64) -> Option<Self> {
        (core_start_khz < core_end_khz).then(|| Self {
            spec_id: spec_id.to_string(),
            core_start_khz,
            core_end_khz,
            center_khz,
        })
    }

    /// Closed-interval membership test.
    pub fn contains(&self, freq_khz: f64) -> bool {
        freq_khz >= self.core_start_khz && freq_khz <= self.core_end_khz
    }
}

/// A named group of capture specs recorded together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSet {
    pub id: String,
    pub windows: Vec<CaptureSpecWindow>,
}

impl CaptureSet {
    pub fn window(&self, spec_id: &str) -> Option<&CaptureSpecWindow> {
        self.windows.iter().find(|w| w.spec_id == spec_id)
    }

    /// Spec ids in declaration order (the tabular log column order).
    pub fn spec_ids(&self) -> Vec<String> {
        self.windows.iter().map(|w| w.spec_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_layout_places_bins_from_span_start() {
        let s = PowerSpectrum::from_uniform(7100.0, 200.0, &[-80.0; 4]).unwrap();
        let freqs: Vec<f64> = s.bins().iter().map(|b| b.0).collect();
        assert_eq!(freqs, vec![7000.0, 7050.0, 7100.0, 7150.0]);
    }

    #[test]
    fn test_waterfall_averages_frames_in_db() {
        let frames = vec![vec![-80.0, -60.0], vec![-70.0, -40.0]];
        let s = PowerSpectrum::from_waterfall(100.0, 10.0, &frames).unwrap();
        assert_eq!(s.bins()[0].1, -75.0);
        assert_eq!(s.bins()[1].1, -50.0);
    }

    #[test]
    fn test_waterfall_rejects_ragged_frames() {
        let frames = vec![vec![-80.0, -60.0], vec![-70.0]];
        let err = PowerSpectrum::from_waterfall(100.0, 10.0, &frames).unwrap_err();
        assert!(matches!(err, SpectrumError::FrameLengthMismatch { index: 1, .. }));
    }

    #[test]
    fn test_non_monotonic_bins_rejected() {
        let err = PowerSpectrum::new(vec![(10.0, -80.0), (10.0, -70.0)]).unwrap_err();
        assert!(matches!(err, SpectrumError::NotMonotonic { index: 1, .. }));
    }

    #[test]
    fn test_nan_power_rejected() {
        let err = PowerSpectrum::new(vec![(10.0, f64::NAN)]).unwrap_err();
        assert!(matches!(err, SpectrumError::NonFinite { index: 0, .. }));
    }

    #[test]
    fn test_extreme_power_rejected() {
        let err = PowerSpectrum::new(vec![(10.0, -80.0), (11.0, 4000.0)]).unwrap_err();
        assert_eq!(err, SpectrumError::PowerOutOfRange { index: 1, power_db: 4000.0 });
        assert!(PowerSpectrum::new(vec![(10.0, -MAX_ABS_POWER_DB)]).is_ok());
    }

    #[test]
    fn test_spectrum_input_untagged_forms() {
        let bins: SpectrumInput = serde_json::from_str(r#"{"bins": [[1.0, -80.0], [2.0, -81.0]]}"#).unwrap();
        assert_eq!(PowerSpectrum::try_from(bins).unwrap().len(), 2);

        let uniform: SpectrumInput =
            serde_json::from_str(r#"{"center_khz": 10.0, "span_khz": 4.0, "power_db": [-80, -81, -82, -83]}"#).unwrap();
        assert_eq!(PowerSpectrum::try_from(uniform).unwrap().len(), 4);

        let waterfall: SpectrumInput =
            serde_json::from_str(r#"{"center_khz": 10.0, "span_khz": 4.0, "frames": [[-80, -81], [-82, -83]]}"#).unwrap();
        assert_eq!(PowerSpectrum::try_from(waterfall).unwrap().len(), 2);
    }

    #[test]
    fn test_window_requires_ascending_edges() {
        assert!(CaptureSpecWindow::new("40m", 7200.0, 7000.0, 7100.0).is_none());
        let w = CaptureSpecWindow::new("40m", 7000.0, 7200.0, 7100.0).unwrap();
        assert!(w.contains(7000.0));
        assert!(w.contains(7200.0));
        assert!(!w.contains(7200.1));
    }
}
