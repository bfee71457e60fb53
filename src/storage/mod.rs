//! Persistence for the engine's local state.
//!
//! Everything the engine keeps across restarts goes through [`ByteStorage`]:
//! a single opaque blob per store. [`SnapshotStore`] frames the last
//! resolution on top of it, and [`visitor`] keeps the per-install visitor id.

mod file;
mod memory;
mod snapshot;

pub mod codec;
pub mod visitor;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use snapshot::SnapshotStore;

use crate::error::StorageError;

/// A single-slot blob store.
///
/// `save` replaces the previous contents atomically: a reader observes either
/// the old blob or the new one, never a mix.
pub trait ByteStorage: Send + Sync {
    /// Replaces the stored blob.
    fn save(&self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Returns the stored blob, or `None` if nothing was saved.
    fn load(&self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Removes the stored blob. Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), StorageError>;

    /// Returns true if nothing is stored.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.load()?.is_none())
    }
}
