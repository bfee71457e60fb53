//! Durable outbox of telemetry records.
//!
//! Records are appended to a single open *generation*. Sealing moves the open
//! generation to the sealed set and starts a fresh one; sealed generations
//! are immutable and only ever read, uploaded, and deleted.

mod file;
mod memory;

pub use file::{FileOutbox, OutboxConfig};
pub use memory::MemoryOutbox;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::sender::Record;

/// Opaque identifier of a sealed generation.
///
/// Ids sort in sealing order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenerationId(String);

impl GenerationId {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Backend-specific name of the generation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Append-only record store with generation rotation.
///
/// Implementations serialize `write_record` and `seal_current_generation`
/// against each other: a record is either fully in the sealed generation or
/// fully in the next open one.
pub trait Outbox: Send + Sync {
    /// Appends a record to the open generation.
    fn write_record(&self, record: &Record) -> Result<(), StorageError>;

    /// Seals the open generation and opens a new one.
    ///
    /// Returns `None` without rotating if the open generation holds no records.
    fn seal_current_generation(&self) -> Result<Option<GenerationId>, StorageError>;

    /// Lists sealed generations, oldest first.
    fn list_sealed_generations(&self) -> Result<Vec<GenerationId>, StorageError>;

    /// Reads every decodable record of a sealed generation, in write order.
    fn read_generation(&self, id: &GenerationId) -> Result<Vec<Record>, StorageError>;

    /// Deletes a sealed generation. Deleting an absent generation is a no-op.
    fn delete_generation(&self, id: &GenerationId) -> Result<(), StorageError>;
}
