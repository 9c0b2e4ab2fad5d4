//! Config validation: unknown-key detection with Levenshtein suggestions
//! and semantic range checks.
//!
//! Two-pass parse approach: first parse raw TOML into `toml::Value`, walk the
//! key tree, compare against known field names and emit warnings with
//! "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use super::qrm_config::{duplicate_ids, QrmConfig};

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `QrmConfig`. Array-of-tables entries
/// appear without an index (`capture_sets.specs.id`).
///
/// Maintained by hand to match the structs in qrm_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [station]
        "station",
        "station.name",
        // [levels]
        "levels",
        "levels.min_db",
        "levels.max_db",
        // [analysis]
        "analysis",
        "analysis.exclude_freqs_khz",
        "analysis.exclusion_half_width_khz",
        "analysis.dc_half_width_khz",
        "analysis.dc_anchor",
        "analysis.truncation_percentile",
        // [thresholds]
        "thresholds",
        "thresholds.medium",
        "thresholds.high",
        "thresholds.critical",
        "thresholds.delta_scale",
        // [storage]
        "storage",
        "storage.data_dir",
        // [server]
        "server",
        "server.addr",
        // [[capture_sets]]
        "capture_sets",
        "capture_sets.id",
        "capture_sets.specs",
        "capture_sets.specs.id",
        "capture_sets.specs.center_khz",
        "capture_sets.specs.start_khz",
        "capture_sets.specs.end_khz",
    ];
    keys.iter().copied().collect()
}

/// Dotted paths of every key in a TOML tree, descending into tables and
/// arrays of tables.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        for nested in walk_toml_keys(item, &path) {
                            if !keys.contains(&nested) {
                                keys.push(nested);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    keys
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3 (ties broken alphabetically).
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|&(dist, _)| dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Semantic Checks
// ============================================================================

/// Ids become directory names and tabular columns.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
}

/// Returns `(errors, warnings)`. Errors are fatal, warnings are logged.
pub fn validate_ranges(config: &QrmConfig) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Levels
    let l = &config.levels;
    if !l.min_db.is_finite() || !l.max_db.is_finite() {
        errors.push(format!(
            "levels: min_db/max_db must be finite (got {}, {})",
            l.min_db, l.max_db
        ));
    } else if l.max_db <= l.min_db {
        errors.push(format!(
            "levels.max_db ({:.1}) must be greater than levels.min_db ({:.1})",
            l.max_db, l.min_db
        ));
    }

    // Analysis
    let a = &config.analysis;
    if a.exclude_freqs_khz.iter().any(|f| !f.is_finite()) {
        errors.push("analysis.exclude_freqs_khz must contain only finite values".to_string());
    }
    for (name, v) in [
        ("exclusion_half_width_khz", a.exclusion_half_width_khz),
        ("dc_half_width_khz", a.dc_half_width_khz),
    ] {
        if !v.is_finite() || v < 0.0 {
            errors.push(format!("analysis.{name} must be a finite value >= 0 (got {v})"));
        }
    }
    if !(a.truncation_percentile > 0.0 && a.truncation_percentile <= 100.0) {
        errors.push(format!(
            "analysis.truncation_percentile must be in (0, 100] (got {})",
            a.truncation_percentile
        ));
    }

    // Thresholds
    let t = &config.thresholds;
    if [t.medium, t.high, t.critical].iter().any(|v| !v.is_finite()) {
        errors.push(format!(
            "thresholds: values must be finite (got medium={}, high={}, critical={})",
            t.medium, t.high, t.critical
        ));
    } else if !(t.medium <= t.high && t.high <= t.critical) {
        warnings.push(format!(
            "thresholds out of order (medium={}, high={}, critical={}); they will be sorted ascending",
            t.medium, t.high, t.critical
        ));
    }
    if !(t.delta_scale > 0.0) || !t.delta_scale.is_finite() {
        errors.push(format!("thresholds.delta_scale must be > 0 (got {})", t.delta_scale));
    }

    // Server
    if config.server.addr.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "server.addr '{}' is not a valid HOST:PORT socket address",
            config.server.addr
        ));
    }

    // Capture sets
    if config.capture_sets.is_empty() {
        warnings.push("no capture sets configured; every recording will be rejected".to_string());
    }
    for dup in duplicate_ids(config.capture_sets.iter().map(|s| s.id.as_str())) {
        errors.push(format!("capture set id '{dup}' is defined more than once"));
    }
    for set in &config.capture_sets {
        if !is_safe_id(&set.id) {
            errors.push(format!(
                "capture set id '{}' must be non-empty and use only letters, digits, '_', '-', '.' or ' '",
                set.id
            ));
        }
        if set.specs.is_empty() {
            warnings.push(format!("capture set '{}' has no specs", set.id));
        }
        for dup in duplicate_ids(set.specs.iter().map(|s| s.id.as_str())) {
            errors.push(format!("capture set '{}': spec id '{dup}' is defined more than once", set.id));
        }
        for spec in &set.specs {
            if !is_safe_id(&spec.id) {
                errors.push(format!(
                    "capture set '{}': spec id '{}' must be non-empty and use only letters, digits, '_', '-', '.' or ' '",
                    set.id, spec.id
                ));
            }
            let values = [spec.center_khz, spec.start_khz, spec.end_khz];
            if values.iter().any(|v| !v.is_finite()) {
                errors.push(format!("capture set '{}': spec '{}' has non-finite frequencies", set.id, spec.id));
            } else if spec.start_khz >= spec.end_khz {
                errors.push(format!(
                    "capture set '{}': spec '{}' start_khz ({}) must be < end_khz ({})",
                    set.id, spec.id, spec.start_khz, spec.end_khz
                ));
            }
        }
    }

    (errors, warnings)
}
