//! Apply-event de-duplication.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::resolution::FlagApplier;
use crate::sender::{EventSender, Record};
use crate::time::Clock;

/// Resolve tokens remembered for de-duplication.
const MAX_TRACKED_TOKENS: usize = 16;

#[derive(Debug, Default)]
struct Applied {
    /// Oldest token first.
    tokens: VecDeque<(String, HashSet<String>)>,
}

impl Applied {
    /// Returns true the first time `flag` is seen for `token`.
    fn insert(&mut self, token: &str, flag: &str) -> bool {
        if let Some((_, flags)) = self.tokens.iter_mut().find(|(t, _)| t == token) {
            return flags.insert(flag.to_string());
        }
        if self.tokens.len() == MAX_TRACKED_TOKENS {
            self.tokens.pop_front();
        }
        self.tokens
            .push_back((token.to_string(), HashSet::from([flag.to_string()])));
        true
    }
}

/// Emits one apply record per flag and resolve token.
pub(crate) struct ApplyTracker {
    applied: Mutex<Applied>,
    sender: Option<Arc<EventSender>>,
    clock: Arc<dyn Clock>,
}

impl ApplyTracker {
    pub(crate) fn new(sender: Option<Arc<EventSender>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            applied: Mutex::new(Applied::default()),
            sender,
            clock,
        }
    }
}

impl FlagApplier for ApplyTracker {
    fn apply(&self, flag: &str, resolve_token: &str) {
        let first = self
            .applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resolve_token, flag);
        if !first {
            return;
        }
        match &self.sender {
            Some(sender) => sender.send(Record::apply(flag, resolve_token, self.clock.now_iso_string())),
            None => debug!(flag, "no event sender configured, apply not recorded"),
        }
    }
}
