//! Storage-client error taxonomy, following the teacher's
//! enum-per-crate-then-compose style (`ruststack-s3-core::error::S3ServiceError`).

use thiserror::Error;

/// Errors a [`crate::StorageClient`] implementation may return.
#[derive(Debug, Error)]
pub enum StorageError {
    /// `get`/`head` on a key that does not exist.
    #[error("no such key: {key}")]
    NoSuchKey {
        /// The missing key.
        key: String,
    },

    /// Serialized metadata exceeded the 2 KiB budget (`spec.md` §4.1).
    #[error("metadata too large: {bytes_over} bytes over budget")]
    MetadataTooLarge {
        /// Bytes over the 2048-byte budget.
        bytes_over: usize,
    },

    /// A byte range requested via streaming reads was invalid.
    #[error("invalid range for key {key}: {reason}")]
    InvalidRange {
        /// The key the range was requested on.
        key: String,
        /// Why the range was rejected.
        reason: String,
    },

    /// The backend could not be reached after exhausting retries.
    #[error("connection error on backend {backend}: {cause}")]
    Connection {
        /// Backend name, e.g. `"s3"`, `"filesystem"`, `"memory"`.
        backend: String,
        /// Underlying cause.
        cause: String,
    },

    /// A continuation token was malformed or stale.
    #[error("invalid continuation token")]
    InvalidContinuation,

    /// An unexpected internal failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result alias for [`StorageError`].
pub type StorageResult<T> = Result<T, StorageError>;

/// Maximum S3-side metadata size in bytes (`spec.md` §3, §4.1).
pub const MAX_METADATA_BYTES: usize = 2048;

/// Compute the serialized size of a metadata map the way S3 counts it:
/// sum of key + value byte lengths.
#[must_use]
pub fn metadata_byte_size(metadata: &std::collections::HashMap<String, String>) -> usize {
    metadata.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// Validate a metadata map against the 2 KiB budget.
pub fn check_metadata_budget(metadata: &std::collections::HashMap<String, String>) -> StorageResult<()> {
    let size = metadata_byte_size(metadata);
    if size > MAX_METADATA_BYTES {
        Err(StorageError::MetadataTooLarge { bytes_over: size - MAX_METADATA_BYTES })
    } else {
        Ok(())
    }
}
