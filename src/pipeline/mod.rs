//! Recording Scoring Pipeline
//!
//! ```text
//! STAGE 1: Recording checks (dB range, capture set, date/time labels)
//! STAGE 2: Spectrum per capture spec, in declaration order
//! STAGE 3: Window selection -> standard + truncated RMS reduction
//! STAGE 4: Ledger append (both rows, one counter)
//! STAGE 5: Severity classification against the current thresholds
//! ```
//!
//! A failure in one capture spec never stops the others.

mod engine;
pub mod source;

pub use engine::*;
pub use source::RecordingSource;
