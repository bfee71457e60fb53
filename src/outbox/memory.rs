//! Volatile outbox, used when no writable directory is available.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{GenerationId, Outbox};
use crate::error::StorageError;
use crate::sender::Record;

#[derive(Debug, Default)]
struct State {
    open: Vec<Record>,
    sealed: BTreeMap<GenerationId, Vec<Record>>,
    next_seq: u64,
}

/// [`Outbox`] that keeps generations in memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    state: Mutex<State>,
}

impl MemoryOutbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("memory outbox lock poisoned".to_string()))
    }
}

impl Outbox for MemoryOutbox {
    fn write_record(&self, record: &Record) -> Result<(), StorageError> {
        self.lock()?.open.push(record.clone());
        Ok(())
    }

    fn seal_current_generation(&self) -> Result<Option<GenerationId>, StorageError> {
        let mut state = self.lock()?;
        if state.open.is_empty() {
            return Ok(None);
        }
        state.next_seq += 1;
        let id = GenerationId::new(format!("mem-{:08}", state.next_seq));
        let records = std::mem::take(&mut state.open);
        state.sealed.insert(id.clone(), records);
        Ok(Some(id))
    }

    fn list_sealed_generations(&self) -> Result<Vec<GenerationId>, StorageError> {
        Ok(self.lock()?.sealed.keys().cloned().collect())
    }

    fn read_generation(&self, id: &GenerationId) -> Result<Vec<Record>, StorageError> {
        Ok(self.lock()?.sealed.get(id).cloned().unwrap_or_default())
    }

    fn delete_generation(&self, id: &GenerationId) -> Result<(), StorageError> {
        self.lock()?.sealed.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(flag: &str) -> Record {
        Record::apply(flag, "tok", "2024-01-01T00:00:00.000Z")
    }

    #[test]
    fn test_seal_rotates_and_orders() {
        let outbox = MemoryOutbox::new();
        assert!(outbox.seal_current_generation().unwrap().is_none());

        outbox.write_record(&apply("a")).unwrap();
        let first = outbox.seal_current_generation().unwrap().unwrap();
        outbox.write_record(&apply("b")).unwrap();
        outbox.write_record(&apply("c")).unwrap();
        let second = outbox.seal_current_generation().unwrap().unwrap();

        assert_eq!(outbox.list_sealed_generations().unwrap(), vec![first.clone(), second.clone()]);
        assert_eq!(outbox.read_generation(&second).unwrap(), vec![apply("b"), apply("c")]);

        outbox.delete_generation(&first).unwrap();
        outbox.delete_generation(&first).unwrap();
        assert_eq!(outbox.list_sealed_generations().unwrap(), vec![second]);
    }
}
