//! Core data types: spectra, capture windows, recordings and score rows

mod recording;
mod score;
mod spectrum;

pub use recording::*;
pub use score::*;
pub use spectrum::*;
