//! Interference scores and the measurement modes that produce them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// RMS Mode
// ============================================================================

/// Which reduction produced a score row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RmsMode {
    /// Mean linear power over every kept bin.
    Standard,
    /// Same, after capping bins at the configured percentile.
    Truncated,
}

impl RmsMode {
    pub const ALL: [RmsMode; 2] = [RmsMode::Standard, RmsMode::Truncated];

    pub fn as_str(self) -> &'static str {
        match self {
            RmsMode::Standard => "standard",
            RmsMode::Truncated => "truncated",
        }
    }

    /// Name of the per-mode tabular log inside a capture set's directory.
    pub fn file_name(self) -> &'static str {
        match self {
            RmsMode::Standard => "rms_standard.csv",
            RmsMode::Truncated => "rms_truncated.csv",
        }
    }
}

impl fmt::Display for RmsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RmsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(RmsMode::Standard),
            "truncated" => Ok(RmsMode::Truncated),
            other => Err(format!(
                "invalid rms type '{}' (expected 'standard' or 'truncated')",
                other
            )),
        }
    }
}

// ============================================================================
// Score Rows
// ============================================================================

/// Per-spec interference percentages of one row, in column order.
///
/// A spec missing from the map was not scored for that recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecScores(Vec<(String, f64)>);

impl SpecScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a spec's score, keeping first-insertion order.
    pub fn insert(&mut self, spec_id: &str, value: f64) {
        match self.0.iter_mut().find(|(id, _)| id == spec_id) {
            Some(slot) => slot.1 = value,
            None => self.0.push((spec_id.to_string(), value)),
        }
    }

    pub fn get(&self, spec_id: &str) -> Option<f64> {
        self.0
            .iter()
            .find(|(id, _)| id == spec_id)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(id, v)| (id.as_str(), *v))
    }

    pub fn spec_ids(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mean of the present scores, `None` when empty.
    pub fn average(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        Some(self.0.iter().map(|(_, v)| v).sum::<f64>() / self.0.len() as f64)
    }
}

impl FromIterator<(String, f64)> for SpecScores {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut scores = SpecScores::new();
        for (id, v) in iter {
            scores.insert(&id, v);
        }
        scores
    }
}

/// Labels shared by every row of one recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMeta {
    pub capture_set_id: String,
    pub date: String,
    pub time: String,
    pub note: String,
}

impl RowMeta {
    /// Note text with line breaks flattened and commas swapped for
    /// semicolons so it stays a single tabular field.
    pub fn sanitize_note(note: &str) -> String {
        note.replace(['\r', '\n'], " ").replace(',', ";")
    }
}

/// One ledger row: a recording's scores under one RMS mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterferenceScore {
    pub counter: u64,
    pub capture_set_id: String,
    pub date: String,
    pub time: String,
    pub note: String,
    pub scores: SpecScores,
}

impl InterferenceScore {
    pub fn from_meta(counter: u64, meta: &RowMeta, scores: SpecScores) -> Self {
        Self {
            counter,
            capture_set_id: meta.capture_set_id.clone(),
            date: meta.date.clone(),
            time: meta.time.clone(),
            note: meta.note.clone(),
            scores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("standard".parse::<RmsMode>(), Ok(RmsMode::Standard));
        assert_eq!("truncated".parse::<RmsMode>(), Ok(RmsMode::Truncated));
        assert!("Standard".parse::<RmsMode>().is_err());
        assert!("both".parse::<RmsMode>().is_err());
    }

    #[test]
    fn test_scores_keep_insertion_order() {
        let mut s = SpecScores::new();
        s.insert("40m", 10.0);
        s.insert("20m", 20.0);
        s.insert("40m", 15.0);
        let ids: Vec<&str> = s.spec_ids().collect();
        assert_eq!(ids, vec!["40m", "20m"]);
        assert_eq!(s.get("40m"), Some(15.0));
        assert_eq!(s.get("80m"), None);
        assert_eq!(s.average(), Some(17.5));
    }

    #[test]
    fn test_note_sanitizing() {
        assert_eq!(RowMeta::sanitize_note("rain,\nwind"), "rain; wind");
    }
}
