//! Upload collaborator interface.

use crate::error::UploadError;

use super::record::Record;

/// Delivers a sealed batch to the backend.
///
/// `Ok(true)` means the batch may be deleted; `Ok(false)` means it must be
/// kept for a later flush. Errors are classified by [`UploadError`]: rejected
/// batches are deleted, transient failures are kept.
///
/// Called from the pipeline's uploader thread; blocking is expected.
pub trait UploadClient: Send + Sync {
    /// Sends one sealed generation.
    fn upload(&self, batch: &[Record]) -> Result<bool, UploadError>;
}

/// Maps an HTTP status to "safe to delete the batch".
///
/// Success and client errors other than 429 delete the batch, since
/// resending a payload the backend refused cannot succeed. Rate limiting and
/// server errors keep it.
#[must_use]
pub const fn cleanup_for_status(status: u16) -> bool {
    match status {
        200..=299 => true,
        429 => false,
        400..=499 => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_for_status() {
        assert!(cleanup_for_status(200));
        assert!(cleanup_for_status(204));
        assert!(cleanup_for_status(400));
        assert!(cleanup_for_status(413));
        assert!(!cleanup_for_status(429));
        assert!(!cleanup_for_status(500));
        assert!(!cleanup_for_status(503));
        assert!(!cleanup_for_status(0));
    }
}
