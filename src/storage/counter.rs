//! Global recording counter
//!
//! One value per recording, shared by every capture set and both RMS modes.
//! Strictly increasing and never reused, even across restarts.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use super::StorageError;

const COUNTER_KEY: &[u8] = b"recording_counter";

pub trait RecordingCounter: Send + Sync {
    /// Reserve and return the next counter value (first value is 1).
    fn next(&self) -> Result<u64, StorageError>;

    /// Last value handed out, 0 if none.
    fn current(&self) -> Result<u64, StorageError>;

    /// Raise the counter to at least `value` (never lowers it).
    fn ensure_at_least(&self, value: u64) -> Result<(), StorageError>;
}

fn decode(bytes: Option<&[u8]>) -> u64 {
    bytes
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map_or(0, u64::from_be_bytes)
}

/// Counter persisted in a sled tree.
///
/// Key: fixed name. Value: u64 big-endian bytes. Flushed on every change so
/// a crash cannot roll the counter back.
#[derive(Clone)]
pub struct SledCounter {
    db: sled::Db,
}

impl SledCounter {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn update(&self, f: impl Fn(u64) -> u64) -> Result<u64, StorageError> {
        let stored = self
            .db
            .update_and_fetch(COUNTER_KEY, |old| Some(f(decode(old)).to_be_bytes().to_vec()))?;
        self.db.flush()?;
        Ok(decode(stored.as_deref()))
    }
}

impl RecordingCounter for SledCounter {
    fn next(&self) -> Result<u64, StorageError> {
        self.update(|n| n + 1)
    }

    fn current(&self) -> Result<u64, StorageError> {
        Ok(decode(self.db.get(COUNTER_KEY)?.as_deref()))
    }

    fn ensure_at_least(&self, value: u64) -> Result<(), StorageError> {
        self.update(|n| n.max(value)).map(|_| ())
    }
}

/// Process-local counter for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryCounter {
    value: AtomicU64,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordingCounter for MemoryCounter {
    fn next(&self) -> Result<u64, StorageError> {
        Ok(self.value.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn current(&self) -> Result<u64, StorageError> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    fn ensure_at_least(&self, value: u64) -> Result<(), StorageError> {
        self.value.fetch_max(value, Ordering::SeqCst);
        Ok(())
    }
}
