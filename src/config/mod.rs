//! Station Configuration Module
//!
//! Scoring parameters, thresholds and capture-set layout loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `--config` CLI flag (errors are fatal)
//! 2. `QRM_CONFIG` environment variable (path to TOML file)
//! 3. `qrm_config.toml` in the current working directory
//! 4. Built-in defaults
//!
//! The loaded `QrmConfig` is handed to the engine and API explicitly,
//! there is no process-global config.

mod qrm_config;
pub mod validation;

pub use qrm_config::*;
