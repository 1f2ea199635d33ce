//! Core error types shared below the engine boundary.

use thiserror::Error;

/// Errors raised while parsing configuration or connection strings.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The connection string did not match any known scheme.
    #[error("unsupported connection scheme: {0}")]
    UnsupportedScheme(String),

    /// The connection string was structurally invalid.
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An unexpected internal failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result alias for [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;
