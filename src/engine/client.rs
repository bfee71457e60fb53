//! Resolve collaborator interface.

use async_trait::async_trait;

use crate::error::ConfidenceResult;
use crate::resolution::ResolvedFlag;
use crate::value::Struct;

use super::task::CancellationToken;

/// Backend answer for one context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveResponse {
    /// Flags resolved for the context.
    pub resolved_flags: Vec<ResolvedFlag>,
    /// Token echoed back on every apply for these flags.
    pub resolve_token: String,
}

/// Resolves every flag for a context against the backend.
///
/// Implementations should observe `cancel` and return early once it fires;
/// the engine discards the result of a cancelled call either way.
#[async_trait]
pub trait ResolveClient: Send + Sync {
    /// Resolves all flags for `context`.
    async fn resolve(&self, context: &Struct, cancel: &CancellationToken) -> ConfidenceResult<ResolveResponse>;
}
