//! The engine-level error taxonomy (`spec.md` §7), composing the lower
//! crates' errors at the boundary the way the teacher composes
//! `S3ServiceError::Internal(#[from] anyhow::Error)` from lower failures.

use s3db_schema::validator::ValidationIssue;
use s3db_storage::StorageError;
use thiserror::Error;

/// Every error an engine public operation may surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A document failed schema validation.
    #[error("validation failed with {} error(s)", .errors.len())]
    Validation {
        /// Every violated rule.
        errors: Vec<ValidationIssue>,
    },

    /// `get`/`update`/`patch`/`delete` targeted an id that does not exist
    /// (or is tombstoned without `include_deleted`).
    #[error("{resource}/{id} not found")]
    NotFound {
        /// Resource name.
        resource: String,
        /// Document id.
        id: String,
    },

    /// `insert` targeted an id that already exists.
    #[error("{resource}/{id} already exists: {reason}")]
    Conflict {
        /// Resource name.
        resource: String,
        /// Document id.
        id: String,
        /// Why the write was rejected.
        reason: String,
    },

    /// The validated, wire-shaped document exceeded the behavior's metadata budget.
    #[error("metadata too large for behavior {behavior}: {bytes_over} bytes over budget")]
    MetadataTooLarge {
        /// The behavior that rejected the write.
        behavior: String,
        /// Bytes over budget.
        bytes_over: usize,
    },

    /// `upsert` would downgrade a document from a newer schema version.
    #[error("schema mismatch on {resource}: expected {expected}, found {actual}")]
    SchemaMismatch {
        /// Resource name.
        resource: String,
        /// The schema version the engine expected.
        expected: String,
        /// The schema version actually found.
        actual: String,
    },

    /// The backend could not be reached, or the connection string was invalid.
    #[error("connection error on backend {backend}: {cause}")]
    Connection {
        /// Backend name.
        backend: String,
        /// Underlying cause.
        cause: String,
    },

    /// A per-key lock could not be acquired within budget.
    #[error("lock timeout on {scope}/{key} after waiting {waited_ms}ms")]
    LockTimeout {
        /// Lock scope.
        scope: String,
        /// Lock key.
        key: String,
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// `query` named a filter not backed by any declared partition.
    #[error("unsupported query: {reason}")]
    UnsupportedQuery {
        /// Why the filter can't be served.
        reason: String,
    },

    /// A partition-ref write failed.
    #[error("partition error on {partition}: {cause}")]
    Partition {
        /// Partition name.
        partition: String,
        /// Underlying cause.
        cause: String,
    },

    /// The operation was cancelled mid-flight.
    #[error("operation cancelled")]
    Cancelled,

    /// A hook intentionally short-circuited the operation (`spec.md` §9:
    /// distinguishes `AbortError` from an unexpected bug).
    #[error("aborted by hook: {0}")]
    Aborted(String),

    /// Schema parsing/hashing failure.
    #[error(transparent)]
    Schema(#[from] s3db_schema::SchemaError),

    /// A lower-level storage failure not otherwise classified above.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An unexpected internal failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<Vec<ValidationIssue>> for EngineError {
    fn from(errors: Vec<ValidationIssue>) -> Self {
        EngineError::Validation { errors }
    }
}

/// Result alias for [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_display_not_found() {
        let err = EngineError::NotFound { resource: "orders".into(), id: "o1".into() };
        assert_eq!(err.to_string(), "orders/o1 not found");
    }

    #[test]
    fn test_should_convert_storage_error() {
        let storage_err = StorageError::NoSuchKey { key: "k".into() };
        let err: EngineError = storage_err.into();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
