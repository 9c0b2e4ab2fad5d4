//! Recording submissions from the acquisition pipeline

use chrono::{Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::score::RowMeta;
use super::spectrum::SpectrumInput;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// A spectrum tagged with the capture spec it was recorded for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedSpectrum {
    pub spec_id: String,
    pub spectrum: SpectrumInput,
}

/// One capture-set recording: a spectrum per spec plus row labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub capture_set_id: String,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub spectra: Vec<TaggedSpectrum>,
}

impl Recording {
    /// New recording stamped with the local wall clock.
    pub fn now(capture_set_id: &str, note: &str) -> Self {
        let now = Local::now();
        Self {
            capture_set_id: capture_set_id.to_string(),
            date: now.format(DATE_FORMAT).to_string(),
            time: now.format(TIME_FORMAT).to_string(),
            note: note.to_string(),
            spectra: Vec::new(),
        }
    }

    /// Check the date and time labels parse in the log formats.
    pub fn validate_stamp(&self) -> Result<(), String> {
        NaiveDate::parse_from_str(&self.date, DATE_FORMAT)
            .map_err(|e| format!("invalid date '{}': {}", self.date, e))?;
        NaiveTime::parse_from_str(&self.time, TIME_FORMAT)
            .map_err(|e| format!("invalid time '{}': {}", self.time, e))?;
        Ok(())
    }

    pub fn meta(&self) -> RowMeta {
        RowMeta {
            capture_set_id: self.capture_set_id.clone(),
            date: self.date.clone(),
            time: self.time.clone(),
            note: RowMeta::sanitize_note(&self.note),
        }
    }
}
