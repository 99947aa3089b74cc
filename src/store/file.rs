use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::csv;
use super::{RecordStore, StoreError};
use crate::kernel::record::Snapshot;

/// Record file rewritten in full on every save.
///
/// Writes go to a sibling temp file which is then renamed over the target, so
/// a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Strict read. `Ok(None)` when the file does not exist.
    pub fn try_load(&self) -> Result<Option<Snapshot>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let records = csv::decode(&text).map_err(|detail| StoreError::Parse {
            path: self.path.clone(),
            detail,
        })?;
        let count = records.len();
        let snapshot = Snapshot::from_records(records);
        if snapshot.len() != count {
            warn!(
                path = %self.path.display(),
                rows = count,
                records = snapshot.len(),
                "duplicate keys in record file were merged"
            );
        }
        Ok(Some(snapshot))
    }

    fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.tmp_path();
        let result = Self::write_and_swap(&tmp, &self.path, snapshot);
        if result.is_err() {
            if let Err(e) = fs::remove_file(&tmp) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %e, "failed to remove temp record file");
                }
            }
        }
        result.map_err(io_err)
    }

    fn write_and_swap(tmp: &Path, target: &Path, snapshot: &Snapshot) -> std::io::Result<()> {
        let mut file = fs::File::create(tmp)?;
        file.write_all(csv::encode(snapshot.records()).as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(tmp, target)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "records.csv".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RecordStore for FileRecordStore {
    fn load(&mut self) -> Snapshot {
        match self.try_load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(path = %self.path.display(), "record file missing, creating an empty one");
                if let Err(e) = self.write(&Snapshot::new()) {
                    warn!(error = %e, "failed to create empty record file");
                }
                Snapshot::new()
            }
            Err(e) => {
                warn!(error = %e, "record file unreadable, treating as empty");
                Snapshot::new()
            }
        }
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        snapshot.validate()?;
        self.write(snapshot)
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.write(&Snapshot::new())
    }
}
