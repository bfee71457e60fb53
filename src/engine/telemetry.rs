//! Evaluation counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ErrorCode;
use crate::resolution::{Evaluation, ResolveReason};

/// Counters accumulated since the last [`Telemetry::snapshot_and_reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Evaluations served from a resolution for an older context.
    pub stale_accesses: u64,
    /// Evaluations whose value did not fit the requested type.
    pub type_mismatches: u64,
}

/// Lock-free evaluation counters, shared by a session and its children.
#[derive(Debug, Default)]
pub struct Telemetry {
    stale_accesses: AtomicU64,
    type_mismatches: AtomicU64,
}

impl Telemetry {
    pub(crate) fn record<T>(&self, evaluation: &Evaluation<T>) {
        if evaluation.reason == ResolveReason::Stale {
            self.stale_accesses.fetch_add(1, Ordering::Relaxed);
        }
        if evaluation.error_code == Some(ErrorCode::TypeMismatch) {
            self.type_mismatches.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the counters and zeroes them.
    pub fn snapshot_and_reset(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            stale_accesses: self.stale_accesses.swap(0, Ordering::Relaxed),
            type_mismatches: self.type_mismatches.swap(0, Ordering::Relaxed),
        }
    }
}
