//! Synthetic Receiver Recordings
//!
//! Generates hourly capture-set recordings for exercising the scoring engine:
//! a flat noise floor with Gaussian jitter per bin, plus a handful of
//! narrowband carriers dropped at random positions.
//!
//! # Usage
//! ```bash
//! ./simulation --count 24 --seed 7 | ./qrm-ledger ingest -
//! ```

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::io::{self, Write};

use qrm_ledger::types::{TaggedSpectrum, DATE_FORMAT, TIME_FORMAT};
use qrm_ledger::{CaptureSpecWindow, QrmConfig, Recording, SpectrumInput};

// ============================================================================
// Constants
// ============================================================================

/// Extra span recorded around each window, as a fraction of its width.
const CROP_MARGIN: f64 = 0.1;
/// Carrier height above the local floor (dB)
const CARRIER_MIN_DB: f64 = 10.0;
const CARRIER_MAX_DB: f64 = 30.0;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "simulation")]
#[command(about = "Synthetic spectrum recordings for qrm-ledger testing")]
#[command(version)]
struct Args {
    /// Number of recordings to emit
    #[arg(short, long, default_value = "24")]
    count: u32,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Capture set to simulate (must exist in the config)
    #[arg(long, default_value = "HF_bands")]
    capture_set: String,

    /// FFT bins per capture spec
    #[arg(long, default_value = "512", value_parser = clap::value_parser!(u32).range(16..=65536))]
    bins: u32,

    /// Mean noise floor (dB)
    #[arg(long, default_value = "-78.0", allow_hyphen_values = true)]
    floor_db: f64,

    /// Per-bin jitter standard deviation (dB)
    #[arg(long, default_value = "2.0")]
    jitter_db: f64,

    /// Maximum carriers per spec
    #[arg(long, default_value = "4")]
    max_carriers: u32,

    /// First timestamp, "YYYY-MM-DD HH:MM"
    #[arg(long, default_value = "2024-01-01 00:00")]
    start: String,

    /// Minutes between recordings
    #[arg(long, default_value = "60")]
    interval_minutes: i64,

    /// Optional config to take capture sets from
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

// ============================================================================
// Spectrum Synthesis
// ============================================================================

struct Synthesizer {
    rng: StdRng,
    jitter: Normal<f64>,
    floor_db: f64,
    bins: usize,
    max_carriers: u32,
}

impl Synthesizer {
    fn new(args: &Args) -> Result<Self> {
        let rng = match args.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng,
            jitter: Normal::new(0.0, args.jitter_db).context("Invalid jitter")?,
            floor_db: args.floor_db,
            bins: args.bins as usize,
            max_carriers: args.max_carriers,
        })
    }

    /// One averaged frame covering `window` plus its crop margins.
    fn spectrum(&mut self, window: &CaptureSpecWindow) -> SpectrumInput {
        let width = window.core_end_khz - window.core_start_khz;
        let span_khz = width * (1.0 + 2.0 * CROP_MARGIN);
        let center_khz = window.core_start_khz + width / 2.0;

        // Slow drift so consecutive recordings produce non-zero deltas.
        let floor = self.floor_db + self.rng.gen_range(-3.0..3.0);
        let mut power_db: Vec<f64> = (0..self.bins)
            .map(|_| floor + self.jitter.sample(&mut self.rng))
            .collect();

        let carriers = self.rng.gen_range(0..=self.max_carriers);
        for _ in 0..carriers {
            let at = self.rng.gen_range(0..self.bins);
            let height = self.rng.gen_range(CARRIER_MIN_DB..CARRIER_MAX_DB);
            let width_bins = self.rng.gen_range(1..=3usize);
            for i in at.saturating_sub(width_bins)..(at + width_bins).min(self.bins) {
                power_db[i] = floor + height;
            }
        }

        SpectrumInput::Uniform {
            center_khz,
            span_khz,
            power_db,
        }
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => QrmConfig::load_from_file(path).context("Failed to load config")?,
        None => QrmConfig::default(),
    };
    let capture_set = config
        .capture_sets()
        .into_iter()
        .find(|s| s.id == args.capture_set)
        .with_context(|| format!("Unknown capture set '{}'", args.capture_set))?;

    let mut stamp = NaiveDateTime::parse_from_str(&args.start, "%Y-%m-%d %H:%M")
        .with_context(|| format!("Invalid --start '{}'", args.start))?;
    let step = Duration::minutes(args.interval_minutes);

    let mut synth = Synthesizer::new(&args)?;
    eprintln!(
        "Simulating {} recordings of '{}' ({} specs, {} bins each)",
        args.count,
        capture_set.id,
        capture_set.windows.len(),
        args.bins
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for n in 0..args.count {
        let spectra = capture_set
            .windows
            .iter()
            .map(|w| TaggedSpectrum {
                spec_id: w.spec_id.clone(),
                spectrum: synth.spectrum(w),
            })
            .collect();
        let recording = Recording {
            capture_set_id: capture_set.id.clone(),
            date: stamp.format(DATE_FORMAT).to_string(),
            time: stamp.format(TIME_FORMAT).to_string(),
            note: format!("sim #{}", n + 1),
            spectra,
        };
        writeln!(out, "{}", serde_json::to_string(&recording)?)?;
        stamp += step;
    }
    out.flush()?;
    Ok(())
}
