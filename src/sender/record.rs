//! Records carried through the outbox.

use serde::{Deserialize, Serialize};

use crate::error::{ConfidenceError, ConfidenceResult};
use crate::value::{Struct, Value};

/// Name of the marker event that forces a flush.
pub const MANUAL_FLUSH_EVENT: &str = "manual_flush";

/// Payload key reserved for the evaluation context of custom events.
pub const CONTEXT_KEY: &str = "context";

/// One telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// A resolved flag was consulted.
    Apply {
        /// Flag name.
        flag: String,
        /// Token of the resolution the flag came from.
        resolve_token: String,
        /// When the flag was consulted.
        applied_at: String,
    },
    /// A custom analytics event, or the manual-flush marker.
    Event {
        /// Event name.
        name: String,
        /// When the event was tracked.
        emitted_at: String,
        /// Event data, including the context.
        #[serde(default)]
        payload: Struct,
    },
}

impl Record {
    /// Builds an apply record.
    #[must_use]
    pub fn apply(flag: impl Into<String>, resolve_token: impl Into<String>, applied_at: impl Into<String>) -> Self {
        Self::Apply {
            flag: flag.into(),
            resolve_token: resolve_token.into(),
            applied_at: applied_at.into(),
        }
    }

    /// Builds a custom event record.
    #[must_use]
    pub fn event(name: impl Into<String>, payload: Struct, emitted_at: impl Into<String>) -> Self {
        Self::Event {
            name: name.into(),
            emitted_at: emitted_at.into(),
            payload,
        }
    }

    /// Builds the marker that forces a flush.
    #[must_use]
    pub fn manual_flush(emitted_at: impl Into<String>) -> Self {
        Self::event(MANUAL_FLUSH_EVENT, Struct::new(), emitted_at)
    }

    /// Returns true for the flush marker, which is never persisted.
    #[must_use]
    pub fn is_manual_flush(&self) -> bool {
        matches!(self, Self::Event { name, .. } if name == MANUAL_FLUSH_EVENT)
    }
}

/// Builds a custom event payload: `data` plus the current context under
/// [`CONTEXT_KEY`].
///
/// # Errors
/// Returns [`ConfidenceError::InvalidContextInMessage`] if `data` already
/// defines [`CONTEXT_KEY`].
pub fn event_payload(mut data: Struct, context: Struct) -> ConfidenceResult<Struct> {
    if data.contains_key(CONTEXT_KEY) {
        return Err(ConfidenceError::InvalidContextInMessage);
    }
    data.insert(CONTEXT_KEY.to_string(), Value::Struct(context));
    Ok(data)
}
