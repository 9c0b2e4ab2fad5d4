//! Delta Engine - period-over-period change between consecutive rows

use crate::types::{InterferenceScore, SpecScores};

/// Change of one cell. Missing or non-finite on either side yields 0.
pub fn cell_delta(newer: Option<f64>, older: Option<f64>) -> f64 {
    match (newer, older) {
        (Some(a), Some(b)) if a.is_finite() && b.is_finite() => a - b,
        _ => 0.0,
    }
}

/// Delta rows for a newest-first sequence.
///
/// `result[i] = rows[i] - rows[i + 1]` for every column in `columns`;
/// metadata is copied from the newer row. Empty when fewer than two rows.
pub fn delta(rows: &[InterferenceScore], columns: &[String]) -> Vec<InterferenceScore> {
    rows.windows(2)
        .map(|pair| {
            let (newer, older) = (&pair[0], &pair[1]);
            let scores: SpecScores = columns
                .iter()
                .map(|col| {
                    let d = cell_delta(newer.scores.get(col), older.scores.get(col));
                    (col.clone(), d)
                })
                .collect();
            InterferenceScore {
                scores,
                ..newer.clone()
            }
        })
        .collect()
}
