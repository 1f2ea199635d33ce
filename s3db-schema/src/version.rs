//! Schema version hashing (`spec.md` §4.2): "a stable hash of the
//! canonical attribute tree + behavior id + partition declarations."

use crate::ast::ParsedSchema;
use sha2::{Digest, Sha256};

/// Compute the stable hash identifying a schema version. `BTreeMap`
/// iteration is sorted, so JSON-serializing the attribute tree is already
/// canonical; behavior and partitions are folded in afterward.
#[must_use]
pub fn compute_hash(schema: &ParsedSchema) -> String {
    let mut hasher = Sha256::new();
    let attrs_json = serde_json::to_vec(&schema.attributes).expect("attribute tree serializes");
    hasher.update(&attrs_json);
    hasher.update(b"\0behavior\0");
    hasher.update(schema.behavior.as_bytes());
    hasher.update(b"\0partitions\0");
    let partitions_json = serde_json::to_vec(&schema.partitions).expect("partitions serialize");
    hasher.update(&partitions_json);
    hex::encode(hasher.finalize())
}
