//! Per-install visitor identifier.

use tracing::warn;
use uuid::Uuid;

use super::ByteStorage;

/// Context key the visitor id is stored under.
pub const VISITOR_ID_CONTEXT_KEY: &str = "visitor_id";

/// Id reported when the visitor id cannot be read or persisted.
pub const STORAGE_ERROR_ID: &str = "storage-error";

/// Returns the persisted visitor id, generating and storing one on first use.
///
/// Never fails: storage problems are logged and yield [`STORAGE_ERROR_ID`].
pub fn get_or_create(storage: &dyn ByteStorage) -> String {
    match storage.load() {
        Ok(Some(bytes)) => match String::from_utf8(bytes) {
            Ok(id) if !id.trim().is_empty() => return id.trim().to_string(),
            _ => warn!("stored visitor id is unreadable, generating a new one"),
        },
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "failed to read visitor id");
            return STORAGE_ERROR_ID.to_string();
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = storage.save(id.as_bytes()) {
        warn!(error = %e, "failed to persist visitor id");
        return STORAGE_ERROR_ID.to_string();
    }
    id
}
