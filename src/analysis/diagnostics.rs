//! Spectrum diagnostics for operator logs
//!
//! Summaries computed from the selected bins of one capture spec. They help
//! explain a score (e.g. one strong carrier vs. a raised noise floor) but
//! never feed back into it.

use serde::Serialize;
use statrs::statistics::{Data, Median};

use super::rms::{db_to_linear, linear_to_db};

/// Minimum linear power ratio over the median for a bin to count as a strong peak.
pub const STRONG_PEAK_RATIO: f64 = 100.0;

/// Minimum separation between reported strong peaks.
pub const PEAK_SEPARATION_KHZ: f64 = 3.0;

pub const MAX_STRONG_PEAKS: usize = 5;

/// Standard/truncated gap (percentage points) above which narrowband
/// interference is suspected.
pub const NARROWBAND_GAP_PP: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumDiagnostics {
    pub bins: usize,
    pub strongest: (f64, f64),
    pub weakest: (f64, f64),
    pub median_db: f64,
    /// Linear power ratio of the strongest bin to the median.
    pub peak_to_median: f64,
    /// `(freq_khz, power_db)`, strongest first.
    pub strong_peaks: Vec<(f64, f64)>,
}

impl SpectrumDiagnostics {
    /// `None` for an empty selection.
    pub fn compute(bins: &[(f64, f64)]) -> Option<Self> {
        let strongest = *bins.iter().max_by(|a, b| a.1.total_cmp(&b.1))?;
        let weakest = *bins.iter().min_by(|a, b| a.1.total_cmp(&b.1))?;

        let median_db = Data::new(bins.iter().map(|b| b.1).collect::<Vec<f64>>()).median();
        let median_linear = db_to_linear(median_db);
        let peak_to_median = db_to_linear(strongest.1) / median_linear;

        let mut candidates: Vec<(f64, f64)> = bins
            .iter()
            .copied()
            .filter(|&(_, db)| db_to_linear(db) >= median_linear * STRONG_PEAK_RATIO)
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut strong_peaks: Vec<(f64, f64)> = Vec::new();
        for candidate in candidates {
            if strong_peaks.len() >= MAX_STRONG_PEAKS {
                break;
            }
            let separated = strong_peaks
                .iter()
                .all(|p| (p.0 - candidate.0).abs() >= PEAK_SEPARATION_KHZ);
            if separated {
                strong_peaks.push(candidate);
            }
        }

        Some(Self {
            bins: bins.len(),
            strongest,
            weakest,
            median_db,
            peak_to_median,
            strong_peaks,
        })
    }

    pub fn peak_to_median_db(&self) -> f64 {
        linear_to_db(self.peak_to_median)
    }
}

/// True when truncation removed enough power to point at a narrowband source.
pub fn narrowband_suspected(standard_pct: f64, truncated_pct: f64) -> bool {
    standard_pct - truncated_pct > NARROWBAND_GAP_PP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_peaks_are_separated_and_capped() {
        let mut bins: Vec<(f64, f64)> = (0..40).map(|i| (i as f64, -90.0)).collect();
        // Two carriers 1 kHz apart: only the stronger is reported.
        bins[10].1 = -50.0;
        bins[11].1 = -55.0;
        bins[30].1 = -60.0;
        // Just under 100x (20 dB) over the floor.
        bins[20].1 = -70.5;

        let d = SpectrumDiagnostics::compute(&bins).unwrap();
        assert_eq!(d.strongest, (10.0, -50.0));
        assert_eq!(d.weakest.1, -90.0);
        assert_eq!(d.median_db, -90.0);
        assert_eq!(d.strong_peaks, vec![(10.0, -50.0), (30.0, -60.0)]);
        assert!((d.peak_to_median_db() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_at_most_five_peaks() {
        let bins: Vec<(f64, f64)> = (0..100)
            .map(|i| {
                let db = if i % 10 == 0 { -40.0 - i as f64 / 10.0 } else { -95.0 };
                (i as f64, db)
            })
            .collect();
        let d = SpectrumDiagnostics::compute(&bins).unwrap();
        assert_eq!(d.strong_peaks.len(), MAX_STRONG_PEAKS);
        assert_eq!(d.strong_peaks[0], (0.0, -40.0));
    }

    #[test]
    fn test_empty_selection_has_no_diagnostics() {
        assert!(SpectrumDiagnostics::compute(&[]).is_none());
    }

    #[test]
    fn test_narrowband_gap() {
        assert!(narrowband_suspected(60.0, 40.0));
        assert!(!narrowband_suspected(50.0, 40.0));
    }
}
