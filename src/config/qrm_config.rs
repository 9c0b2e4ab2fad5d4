//! Station configuration - dB range, exclusions, thresholds, capture sets
//!
//! Every section implements `Default`, so a partial (or empty) TOML file is
//! a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analysis::{DbRange, DcAnchor, ExclusionSet, Thresholds};
use crate::types::{CaptureSet, CaptureSpecWindow};

/// Environment variable holding a config file path.
pub const CONFIG_ENV_VAR: &str = "QRM_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "qrm_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrmConfig {
    #[serde(default)]
    pub station: StationInfo,

    /// Dynamic range mapped to 0..100 %
    #[serde(default)]
    pub levels: LevelsConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Initial severity thresholds (adjustable at runtime)
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Capture sets; spec order is the log column order.
    #[serde(default = "default_capture_sets")]
    pub capture_sets: Vec<CaptureSetConfig>,
}

impl Default for QrmConfig {
    fn default() -> Self {
        Self {
            station: StationInfo::default(),
            levels: LevelsConfig::default(),
            analysis: AnalysisConfig::default(),
            thresholds: ThresholdConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            capture_sets: default_capture_sets(),
        }
    }
}

impl QrmConfig {
    /// Load using the standard search order. An explicit path must exist
    /// and parse; a bad `QRM_CONFIG` path falls through to the next source.
    /// Parse and validation errors are always returned.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(p) = explicit {
            let config = Self::load_from_file(p)?;
            info!(path = %p.display(), station = %config.station.name, "Loaded config from --config");
            return Ok(config);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), station = %config.station.name, "Loaded config from QRM_CONFIG");
                return Ok(config);
            }
            warn!(path = %path, "QRM_CONFIG points to non-existent file, falling back");
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!(station = %config.station.name, "Loaded config from ./qrm_config.toml");
            return Ok(config);
        }

        info!("No qrm_config.toml found, using built-in defaults");
        Ok(Self::default())
    }

    /// Load and validate one TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Two-pass parse: unknown-key warnings first, then serde + validation.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Collect every semantic error; warnings are logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!("{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    // ------------------------------------------------------------------------
    // Derived engine inputs
    // ------------------------------------------------------------------------

    pub fn db_range(&self) -> Result<DbRange, crate::analysis::AnalysisError> {
        DbRange::new(self.levels.min_db, self.levels.max_db)
    }

    pub fn exclusion_set(&self) -> ExclusionSet {
        let a = &self.analysis;
        ExclusionSet::new(
            a.dc_half_width_khz,
            a.dc_anchor,
            &a.exclude_freqs_khz,
            a.exclusion_half_width_khz,
        )
    }

    /// Thresholds as configured, sorted ascending.
    pub fn initial_thresholds(&self) -> Thresholds {
        Thresholds {
            medium: self.thresholds.medium,
            high: self.thresholds.high,
            critical: self.thresholds.critical,
        }
        .normalized()
    }

    /// Capture sets with their scoring windows. Windows with inverted edges
    /// are dropped (validation already rejects them).
    pub fn capture_sets(&self) -> Vec<CaptureSet> {
        self.capture_sets
            .iter()
            .map(|set| CaptureSet {
                id: set.id.clone(),
                windows: set
                    .specs
                    .iter()
                    .filter_map(|s| {
                        CaptureSpecWindow::new(&s.id, s.start_khz, s.end_khz, s.center_khz)
                    })
                    .collect(),
            })
            .collect()
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Station
// ============================================================================

/// Identification only; appears in logs and the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationInfo {
    #[serde(default = "default_station_name")]
    pub name: String,
}

fn default_station_name() -> String {
    "DEFAULT".to_string()
}

impl Default for StationInfo {
    fn default() -> Self {
        Self {
            name: default_station_name(),
        }
    }
}

// ============================================================================
// Levels
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelsConfig {
    /// Power mapped to 0 %
    #[serde(default = "default_min_db")]
    pub min_db: f64,

    /// Power mapped to 100 % (higher values exceed 100 %)
    #[serde(default = "default_max_db")]
    pub max_db: f64,
}

fn default_min_db() -> f64 {
    -85.0
}
fn default_max_db() -> f64 {
    -60.0
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            min_db: default_min_db(),
            max_db: default_max_db(),
        }
    }
}

// ============================================================================
// Analysis
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Frequencies (kHz) never scored. 0 kHz catches DC artifacts;
    /// 28800 kHz is the RTL-SDR Blog V4 upconverter LO.
    #[serde(default = "default_exclude_freqs")]
    pub exclude_freqs_khz: Vec<f64>,

    #[serde(default = "default_exclusion_half_width")]
    pub exclusion_half_width_khz: f64,

    #[serde(default = "default_dc_half_width")]
    pub dc_half_width_khz: f64,

    #[serde(default)]
    pub dc_anchor: DcAnchor,

    #[serde(default = "default_truncation_percentile")]
    pub truncation_percentile: f64,
}

fn default_exclude_freqs() -> Vec<f64> {
    vec![0.0, 28800.0]
}
fn default_exclusion_half_width() -> f64 {
    crate::analysis::window::DEFAULT_EXCLUSION_HALF_WIDTH_KHZ
}
fn default_dc_half_width() -> f64 {
    crate::analysis::window::DEFAULT_DC_HALF_WIDTH_KHZ
}
fn default_truncation_percentile() -> f64 {
    crate::analysis::rms::DEFAULT_TRUNCATION_PERCENTILE
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            exclude_freqs_khz: default_exclude_freqs(),
            exclusion_half_width_khz: default_exclusion_half_width(),
            dc_half_width_khz: default_dc_half_width(),
            dc_anchor: DcAnchor::default(),
            truncation_percentile: default_truncation_percentile(),
        }
    }
}

// ============================================================================
// Thresholds
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_medium")]
    pub medium: f64,
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_critical")]
    pub critical: f64,

    /// Factor applied to the thresholds when classifying deltas
    #[serde(default = "default_delta_scale")]
    pub delta_scale: f64,
}

fn default_medium() -> f64 {
    20.0
}
fn default_high() -> f64 {
    40.0
}
fn default_critical() -> f64 {
    50.0
}
fn default_delta_scale() -> f64 {
    crate::analysis::severity::DEFAULT_DELTA_SCALE
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            medium: default_medium(),
            high: default_high(),
            critical: default_critical(),
            delta_scale: default_delta_scale(),
        }
    }
}

// ============================================================================
// Storage / Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the score logs and the counter database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address. Overridden by `--addr`.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    "127.0.0.1:7060".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Capture Sets
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSetConfig {
    pub id: String,
    #[serde(default)]
    pub specs: Vec<CaptureSpecConfig>,
}

/// One monitored sub-range. `start_khz..=end_khz` is the scoring window
/// (crop margins already removed); `center_khz` is the tuned frequency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSpecConfig {
    pub id: String,
    pub center_khz: f64,
    pub start_khz: f64,
    pub end_khz: f64,
}

/// IARU Region 1 HF allocations, tuned at the band start.
const HF_BANDS_KHZ: [(&str, f64, f64); 7] = [
    ("80m", 3500.0, 3800.0),
    ("40m", 7000.0, 7200.0),
    ("30m", 10100.0, 10150.0),
    ("20m", 14000.0, 14350.0),
    ("17m", 18068.0, 18168.0),
    ("15m", 21000.0, 21450.0),
    ("10m", 28000.0, 29700.0),
];

fn default_capture_sets() -> Vec<CaptureSetConfig> {
    vec![CaptureSetConfig {
        id: "HF_bands".to_string(),
        specs: HF_BANDS_KHZ
            .iter()
            .map(|&(id, start, end)| CaptureSpecConfig {
                id: id.to_string(),
                center_khz: start,
                start_khz: start,
                end_khz: end,
            })
            .collect(),
    }]
}

/// Ids used in more than once, for validation messages.
pub(crate) fn duplicate_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    let mut dups = Vec::new();
    for id in ids {
        if !seen.insert(id) && !dups.contains(&id) {
            dups.push(id);
        }
    }
    dups
}

// ============================================================================
// Tests
// ============================================================================
