//! Severity Classifier
//!
//! Maps scores and score deltas onto Low/Medium/High/Critical bands using
//! three ascending thresholds. The thresholds live in a `ThresholdCell` that
//! hands out immutable snapshots and swaps all three values at once.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Multiplier applied to the thresholds when classifying deltas.
pub const DEFAULT_DELTA_SCALE: f64 = 0.3;

// ============================================================================
// Bands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Which palette a delta cell is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaDirection {
    /// Zero or positive change.
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSeverity {
    pub band: Severity,
    pub direction: DeltaDirection,
}

// ============================================================================
// Thresholds
// ============================================================================

/// Band boundaries. `medium <= high <= critical` after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            medium: 20.0,
            high: 40.0,
            critical: 50.0,
        }
    }
}

impl Thresholds {
    /// Same values sorted ascending into medium/high/critical.
    pub fn normalized(self) -> Self {
        let mut v = [self.medium, self.high, self.critical];
        v.sort_by(f64::total_cmp);
        Self {
            medium: v[0],
            high: v[1],
            critical: v[2],
        }
    }

    pub fn is_ascending(&self) -> bool {
        self.medium <= self.high && self.high <= self.critical
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            medium: self.medium * factor,
            high: self.high * factor,
            critical: self.critical * factor,
        }
    }
}

/// Sort raw values into a valid triple. Never fails.
pub fn update_thresholds(raw: Thresholds) -> Thresholds {
    raw.normalized()
}

pub fn classify(value: f64, thresholds: &Thresholds) -> Severity {
    if value >= thresholds.critical {
        Severity::Critical
    } else if value >= thresholds.high {
        Severity::High
    } else if value >= thresholds.medium {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Band of `|delta|` against the scaled thresholds; the sign picks the palette.
pub fn classify_delta(delta: f64, thresholds: &Thresholds, scale: f64) -> DeltaSeverity {
    DeltaSeverity {
        band: classify(delta.abs(), &thresholds.scaled(scale)),
        direction: if delta < 0.0 {
            DeltaDirection::Decrease
        } else {
            DeltaDirection::Increase
        },
    }
}

// ============================================================================
// Shared cell
// ============================================================================

/// Runtime-adjustable thresholds shared between writers and readers.
///
/// Readers take a snapshot per classification pass so they never see a mix
/// of old and new values.
#[derive(Debug)]
pub struct ThresholdCell {
    current: ArcSwap<Thresholds>,
    delta_scale: f64,
}

impl ThresholdCell {
    pub fn new(initial: Thresholds, delta_scale: f64) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial.normalized()),
            delta_scale,
        }
    }

    pub fn snapshot(&self) -> Arc<Thresholds> {
        self.current.load_full()
    }

    pub fn delta_scale(&self) -> f64 {
        self.delta_scale
    }

    /// Normalize and publish new thresholds, returning what was stored.
    pub fn update(&self, raw: Thresholds) -> Thresholds {
        let normalized = update_thresholds(raw);
        self.current.store(Arc::new(normalized));
        normalized
    }
}

impl Default for ThresholdCell {
    fn default() -> Self {
        Self::new(Thresholds::default(), DEFAULT_DELTA_SCALE)
    }
}
