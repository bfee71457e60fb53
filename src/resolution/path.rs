//! Dot-separated flag paths: `flag_name[.field[.field...]]`.

use crate::error::ConfidenceError;

/// A parsed flag path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagPath {
    /// Flag name.
    pub flag: String,
    /// Field names to walk inside the flag value.
    pub path: Vec<String>,
}

impl FlagPath {
    /// Splits `key` into the flag name and the field path inside its value.
    ///
    /// # Errors
    ///
    /// Returns `ConfidenceError::Parse` when the flag name or any path segment
    /// is empty.
    pub fn parse(key: &str) -> Result<Self, ConfidenceError> {
        let mut parts = key.split('.');
        let flag = parts.next().unwrap_or_default();
        if flag.is_empty() {
            return Err(ConfidenceError::parse(format!("flag path '{key}' has no flag name")));
        }
        let path: Vec<String> = parts.map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(ConfidenceError::parse(format!("flag path '{key}' contains an empty segment")));
        }
        Ok(Self {
            flag: flag.to_string(),
            path,
        })
    }
}
