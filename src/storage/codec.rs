//! Binary framing for persisted snapshots.
//!
//! Format:
//! ```text
//! [magic: 4 bytes][version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StorageError;

const CODEC_VERSION: u8 = 1;

/// Identifies snapshot blobs written by this crate.
pub const MAGIC: [u8; 4] = *b"CNFD";

const HEADER_LEN: usize = MAGIC.len() + 1 + 4;

/// Snapshots larger than this are treated as corrupted.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// Serializes a value into a framed, checksummed blob.
///
/// # Errors
/// Returns [`StorageError::Serialization`] if the value cannot be encoded.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let data = serde_json::to_vec(value)
        .map_err(|e| StorageError::Serialization(format!("serialization failed: {e}")))?;
    let len = u32::try_from(data.len())
        .map_err(|_| StorageError::Serialization(format!("entry of {} bytes is too large", data.len())))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(HEADER_LEN + data.len() + 4);
    out.extend_from_slice(&MAGIC);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Decodes a blob produced by [`encode`], verifying framing and checksum.
///
/// # Errors
/// Returns [`StorageError::Corrupted`] for truncated input, a bad header, a
/// checksum mismatch, trailing bytes, or a body that is not valid JSON for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    if bytes.len() < HEADER_LEN {
        return Err(StorageError::Corrupted(format!(
            "blob of {} bytes is shorter than the header",
            bytes.len()
        )));
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(StorageError::Corrupted(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {magic:?}"
        )));
    }
    let (version, rest) = rest.split_at(1);
    if version[0] != CODEC_VERSION {
        return Err(StorageError::Corrupted(format!(
            "unsupported codec version: {} (expected {CODEC_VERSION})",
            version[0]
        )));
    }
    let (len_bytes, rest) = rest.split_at(4);
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(len_bytes);
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(StorageError::Corrupted(format!(
            "entry size {len} exceeds maximum {MAX_ENTRY_SIZE}"
        )));
    }
    if rest.len() != len + 4 {
        return Err(StorageError::Corrupted(format!(
            "expected {} bytes of body and checksum, found {}",
            len + 4,
            rest.len()
        )));
    }
    let (data, crc_bytes) = rest.split_at(len);
    let mut crc_buf = [0u8; 4];
    crc_buf.copy_from_slice(crc_bytes);
    let stored_crc = u32::from_le_bytes(crc_buf);

    let mut hasher = Hasher::new();
    hasher.update(data);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(StorageError::Corrupted(format!(
            "CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x}"
        )));
    }

    serde_json::from_slice(data)
        .map_err(|e| StorageError::Corrupted(format!("deserialization failed: {e}")))
}
