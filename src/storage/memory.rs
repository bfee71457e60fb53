//! In-memory byte storage, for tests and ephemeral sessions.

use std::sync::RwLock;

use super::ByteStorage;
use crate::error::StorageError;

/// Volatile [`ByteStorage`] backed by a lock-protected buffer.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slot: RwLock<Option<Vec<u8>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> StorageError {
        StorageError::Backend("memory storage lock poisoned".to_string())
    }
}

impl ByteStorage for MemoryStorage {
    fn save(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let mut slot = self.slot.write().map_err(|_| Self::lock_err())?;
        *slot = Some(bytes.to_vec());
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let slot = self.slot.read().map_err(|_| Self::lock_err())?;
        Ok(slot.clone())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut slot = self.slot.write().map_err(|_| Self::lock_err())?;
        *slot = None;
        Ok(())
    }

    fn is_empty(&self) -> Result<bool, StorageError> {
        let slot = self.slot.read().map_err(|_| Self::lock_err())?;
        Ok(slot.is_none())
    }
}
