//! File-backed byte storage.
//!
//! Writes go to a uniquely named temp file in the same directory, are
//! fsynced, then renamed over the target. A crash mid-write leaves the
//! previous blob intact; stale temp files are removed on open.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use super::ByteStorage;
use crate::error::StorageError;

const TEMP_MARKER: &str = ".tmp.";

/// [`ByteStorage`] persisted to a single file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Opens storage at `path`, creating the parent directory if needed.
    ///
    /// # Errors
    /// Returns an I/O error if the directory cannot be created or scanned.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
            Self::remove_stale_temps(dir, &path)?;
        }
        Ok(Self { path })
    }

    /// File the blob is stored in.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn remove_stale_temps(dir: &Path, path: &Path) -> Result<(), StorageError> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        let prefix = format!("{name}{TEMP_MARKER}");
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let is_stale = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(&prefix));
            if is_stale {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(path = ?entry.path(), error = %e, "failed to remove stale temp file");
                }
            }
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("storage");
        self.path
            .with_file_name(format!("{name}{TEMP_MARKER}{}", Uuid::new_v4()))
    }
}

impl ByteStorage for FileStorage {
    fn save(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let temp_path = self.temp_path();
        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result.map_err(StorageError::from)
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_empty(&self) -> Result<bool, StorageError> {
        match fs::metadata(&self.path) {
            Ok(_) => Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}
