//! Schema-engine errors.

use crate::validator::ValidationIssue;
use thiserror::Error;

/// Errors raised while parsing a schema DSL or validating a document against it.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A DSL token was not recognized.
    #[error("unknown attribute token: {0}")]
    UnknownToken(String),

    /// A modifier argument failed to parse (e.g. `min:abc`).
    #[error("invalid modifier argument in {token}: {reason}")]
    InvalidModifierArgument {
        /// The offending token.
        token: String,
        /// Why it failed.
        reason: String,
    },

    /// An attribute declaration was structurally malformed.
    #[error("malformed attribute declaration for {path}: {reason}")]
    MalformedDeclaration {
        /// Attribute path.
        path: String,
        /// Why it failed.
        reason: String,
    },

    /// A document failed validation; `errors` carries every violated rule.
    #[error("validation failed with {} error(s)", .errors.len())]
    Validation {
        /// Every validation issue found.
        errors: Vec<ValidationIssue>,
    },
}

/// Result alias for [`SchemaError`].
pub type SchemaResult<T> = Result<T, SchemaError>;
