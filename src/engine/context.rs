//! Session context composition.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use crate::value::Struct;

#[derive(Debug, Default)]
struct ContextState {
    entries: Struct,
    /// Keys hidden from the parent's context. Survives parent updates.
    removed: HashSet<String>,
}

/// One session's context entries, layered over an optional parent.
#[derive(Debug, Default)]
pub(crate) struct ContextManager {
    state: RwLock<ContextState>,
    parent: Option<Arc<ContextManager>>,
}

impl ContextManager {
    pub(crate) fn new(entries: Struct, parent: Option<Arc<ContextManager>>) -> Self {
        Self {
            state: RwLock::new(ContextState {
                entries,
                removed: HashSet::new(),
            }),
            parent,
        }
    }

    /// Parent context minus removed keys, overlaid with this session's entries.
    pub(crate) fn effective(&self) -> Struct {
        let mut context = self.parent.as_ref().map(|p| p.effective()).unwrap_or_default();
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        context.retain(|key, _| !state.removed.contains(key));
        context.extend(state.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        context
    }

    /// Applies puts, then removals.
    pub(crate) fn apply(&self, entries: Struct, remove_keys: &[String]) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries {
            state.removed.remove(&key);
            state.entries.insert(key, value);
        }
        for key in remove_keys {
            state.entries.remove(key);
            state.removed.insert(key.clone());
        }
    }
}
