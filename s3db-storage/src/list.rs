//! Pagination types shared by every backend's `list` operation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Options for a `list` call.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Opaque continuation token from a previous call's [`ListResult`].
    pub continuation: Option<String>,
    /// Maximum number of keys to return.
    pub limit: Option<usize>,
}

/// The result of a `list` call: a lexicographically sorted page of keys
/// plus an optional continuation token for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResult {
    /// Keys in this page, lexicographic order.
    pub keys: Vec<String>,
    /// Token to pass as `continuation` to fetch the next page, if any.
    pub continuation: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    last_key: String,
}

/// Encode a continuation token from the last key returned in a page.
#[must_use]
pub fn encode_continuation(last_key: &str) -> String {
    let payload = TokenPayload { last_key: last_key.to_string() };
    let json = serde_json::to_vec(&payload).expect("token payload serializes");
    STANDARD.encode(json)
}

/// Decode a continuation token back into the exclusive-start-key it encodes.
pub fn decode_continuation(token: &str) -> Result<String, crate::error::StorageError> {
    let bytes = STANDARD.decode(token).map_err(|_| crate::error::StorageError::InvalidContinuation)?;
    let payload: TokenPayload =
        serde_json::from_slice(&bytes).map_err(|_| crate::error::StorageError::InvalidContinuation)?;
    Ok(payload.last_key)
}
