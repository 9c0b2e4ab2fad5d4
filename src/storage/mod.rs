//! Score Ledger Storage
//!
//! The in-memory time-series ledger plus the durable pieces behind it:
//! per-capture-set tabular logs and the global recording counter (sled).

pub mod counter;
pub mod ledger;
pub mod persistence;
pub mod tabular;

pub use counter::{MemoryCounter, RecordingCounter, SledCounter};
pub use ledger::{Ledger, LedgerTable, Series, SeriesKey};
pub use persistence::{LedgerStore, MemoryStore, PendingRow};
pub use tabular::CsvLogStore;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("counter database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("malformed log {} line {line}: {reason}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("ledger lock poisoned")]
    Poisoned,
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
