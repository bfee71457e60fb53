//! Resolution snapshots.
//!
//! A [`Resolution`] is the immutable result of one successful fetch: the
//! context it was fetched for, the resolved flags, and the backend's resolve
//! token. It is replaced wholesale by the next successful fetch and never
//! mutated field by field.

mod evaluate;
mod path;

pub use evaluate::{Evaluable, Evaluation, FlagApplier};
pub use path::FlagPath;

use serde::{Deserialize, Serialize};

use crate::hash::hash_context;
use crate::value::Struct;

/// Why the backend resolved a flag the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolveReason {
    /// Backend did not say.
    #[serde(rename = "RESOLVE_REASON_UNSPECIFIED")]
    Unspecified,
    /// A rule matched and produced a value.
    #[serde(rename = "RESOLVE_REASON_MATCH")]
    Match,
    /// Cached value was produced for a different context. Client-side only.
    #[serde(rename = "RESOLVE_REASON_STALE")]
    Stale,
    /// No targeting segment matched.
    #[serde(rename = "RESOLVE_REASON_NO_SEGMENT_MATCH")]
    NoSegmentMatch,
    /// A segment matched but no treatment applied.
    #[serde(rename = "RESOLVE_REASON_NO_TREATMENT_MATCH")]
    NoTreatmentMatch,
    /// The flag is archived.
    #[serde(rename = "RESOLVE_REASON_FLAG_ARCHIVED")]
    Archived,
    /// The targeting key in the context was invalid.
    #[serde(rename = "RESOLVE_REASON_TARGETING_KEY_ERROR")]
    TargetingKeyError,
    /// The backend failed to resolve the flag.
    #[serde(rename = "RESOLVE_REASON_ERROR")]
    Error,
    /// A reason this client does not know.
    #[serde(other)]
    Unknown,
}

/// One flag as resolved by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFlag {
    /// Flag name without any field path.
    pub flag: String,
    /// Variant name, when a rule matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Flag values are always structures; absent means "use the default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Struct>,
    /// Backend resolve reason.
    pub reason: ResolveReason,
    /// Whether consulting this flag emits an apply record.
    #[serde(default)]
    pub should_apply: bool,
}

impl ResolvedFlag {
    /// A matched flag carrying a value.
    #[must_use]
    pub fn matched(flag: impl Into<String>, variant: impl Into<String>, value: Struct) -> Self {
        Self {
            flag: flag.into(),
            variant: Some(variant.into()),
            value: Some(value),
            reason: ResolveReason::Match,
            should_apply: true,
        }
    }

    /// A flag that resolved without a value for the given reason.
    #[must_use]
    pub fn without_value(flag: impl Into<String>, reason: ResolveReason) -> Self {
        Self {
            flag: flag.into(),
            variant: None,
            value: None,
            reason,
            should_apply: false,
        }
    }

    /// Overrides whether the flag is applied on evaluation.
    #[must_use]
    pub fn with_should_apply(mut self, should_apply: bool) -> Self {
        self.should_apply = should_apply;
        self
    }
}

/// Immutable snapshot of resolved flags for one context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Context the flags were resolved for.
    pub context: Struct,
    /// Resolved flags.
    pub flags: Vec<ResolvedFlag>,
    /// Token attached to apply records for these flags.
    pub resolve_token: String,
}

impl Resolution {
    /// Builds a snapshot from a resolve response.
    #[must_use]
    pub fn new(context: Struct, flags: Vec<ResolvedFlag>, resolve_token: impl Into<String>) -> Self {
        Self {
            context,
            flags,
            resolve_token: resolve_token.into(),
        }
    }

    /// The snapshot used before anything was fetched or after corruption.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true for a snapshot that was never fetched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.context.is_empty() && self.resolve_token.is_empty()
    }

    /// Canonical hash of the context this snapshot was fetched for.
    #[must_use]
    pub fn context_hash(&self) -> String {
        hash_context(&self.context)
    }

    /// Looks up a flag by name.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<&ResolvedFlag> {
        self.flags.iter().find(|f| f.flag == name)
    }
}
