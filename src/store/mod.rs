//! Durable record store: the single source of truth between runs.
//!
//! # SERIALIZATION
//! All access goes through [`SharedStore`], whose mutex is held across every
//! load-merge-save and every settle-after-upload, so an occurrence recorded on
//! one thread can never be overwritten by another thread's stale snapshot.

pub mod csv;
pub mod file;

use parking_lot::{Mutex, MutexGuard};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::kernel::record::{RecordError, Snapshot};

pub use file::FileRecordStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record file {path}: {detail}")]
    Parse { path: PathBuf, detail: csv::ParseError },
    #[error("refusing to store malformed record: {0}")]
    MalformedRecord(#[from] RecordError),
}

impl std::error::Error for csv::ParseError {}

pub trait RecordStore: Send {
    /// Full current snapshot. Never fails: missing or corrupt backing data
    /// reads as empty.
    fn load(&mut self) -> Snapshot;

    /// Replaces the persisted snapshot with exactly `snapshot`.
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Empties the store, leaving it well-formed.
    fn clear(&mut self) -> Result<(), StoreError>;
}

/// Store kept in process memory. Used by embedders that do not want a file
/// and by tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    snapshot: Snapshot,
    fail_writes: bool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            fail_writes: false,
        }
    }

    /// Makes every later save/clear fail, to exercise degraded paths.
    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Io {
                path: PathBuf::from("<memory>"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "writes disabled"),
            });
        }
        Ok(())
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&mut self) -> Snapshot {
        self.snapshot.clone()
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        snapshot.validate()?;
        self.check_writable()?;
        self.snapshot = snapshot.clone();
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.check_writable()?;
        self.snapshot = Snapshot::new();
        Ok(())
    }
}

/// Cloneable handle serializing access to one record store.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Box<dyn RecordStore>>>,
}

impl SharedStore {
    pub fn new(store: impl RecordStore + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn RecordStore>> {
        self.inner.lock()
    }

    /// Read-only view for dashboards and prompts.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().load()
    }
}
