//! Persistence of the last fetched [`Resolution`].

use std::sync::Arc;

use tracing::{debug, warn};

use super::{codec, ByteStorage};
use crate::error::StorageError;
use crate::resolution::Resolution;

/// Reads and writes the resolution snapshot through a [`ByteStorage`].
#[derive(Clone)]
pub struct SnapshotStore {
    storage: Arc<dyn ByteStorage>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").finish_non_exhaustive()
    }
}

impl SnapshotStore {
    /// Wraps `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn ByteStorage>) -> Self {
        Self { storage }
    }

    /// Persists `resolution`, replacing the previous snapshot.
    ///
    /// # Errors
    /// Returns the storage or encoding failure.
    pub fn save(&self, resolution: &Resolution) -> Result<(), StorageError> {
        let bytes = codec::encode(resolution)?;
        self.storage.save(&bytes)?;
        debug!(flags = resolution.flags.len(), "persisted resolution snapshot");
        Ok(())
    }

    /// Loads the persisted snapshot.
    ///
    /// An empty store yields [`Resolution::empty`]. A snapshot that cannot be
    /// decoded is logged, cleared from storage, and also reported as empty.
    ///
    /// # Errors
    /// Returns an error only if the storage itself cannot be read.
    pub fn load(&self) -> Result<Resolution, StorageError> {
        let Some(bytes) = self.storage.load()? else {
            return Ok(Resolution::empty());
        };
        match codec::decode::<Resolution>(&bytes) {
            Ok(resolution) => Ok(resolution),
            Err(e) => {
                warn!(error = %e, "discarding corrupted resolution snapshot");
                if let Err(clear_err) = self.storage.clear() {
                    warn!(error = %clear_err, "failed to clear corrupted resolution snapshot");
                }
                Ok(Resolution::empty())
            }
        }
    }

    /// Returns true if no snapshot is persisted.
    ///
    /// # Errors
    /// Returns the storage failure.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.storage.is_empty()
    }
}
