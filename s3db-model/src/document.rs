//! [`Document`] and its lifecycle state machine, generalizing the
//! teacher's `ObjectVersion`/`S3DeleteMarker` modeling
//! (`ruststack-s3-core::state::object`) of an S3 object's lifecycle to a
//! paranoid-delete document lifecycle (`spec.md` §4.5).

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stored document: user attributes plus the system fields every
/// document carries (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque document id.
    pub id: String,
    /// User-supplied attributes, keyed by schema attribute name.
    pub attributes: BTreeMap<String, Value>,
    /// Schema version hash this document was last written under.
    pub schema_version: String,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last-update timestamp.
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Tombstone timestamp, set when `paranoid` delete soft-deletes a document.
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Document {
    /// `true` once a paranoid delete has tombstoned this document.
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Look up a user attribute by name.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }
}

/// The lifecycle of a document when its owning resource has
/// `paranoid=true` (`spec.md` §4.5): `absent -> live -> tombstoned -> purged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// No document has ever existed at this id.
    Absent,
    /// The document exists and is not deleted.
    Live,
    /// The document has been soft-deleted; the body is retained.
    Tombstoned,
    /// The document has been permanently purged.
    Purged,
}

/// An attempted transition that the state machine does not allow.
#[derive(Debug, thiserror::Error)]
#[error("illegal document state transition: {from:?} -> {attempted:?}")]
pub struct IllegalTransition {
    /// The state the document was in.
    pub from: DocumentState,
    /// The transition that was attempted.
    pub attempted: DocumentState,
}

impl DocumentState {
    /// Validate and perform a transition, per the state diagram in
    /// `spec.md` §4.5: insert -> live, delete -> tombstoned, explicit
    /// purge -> purged. `live -> live` (re-insert after upsert) and
    /// `tombstoned -> live` (restore via update/patch) are both allowed;
    /// everything else is rejected.
    pub fn transition(self, to: DocumentState) -> Result<DocumentState, IllegalTransition> {
        use DocumentState::{Absent, Live, Purged, Tombstoned};
        let allowed = matches!(
            (self, to),
            (Absent, Live)
                | (Live, Live)
                | (Live, Tombstoned)
                | (Tombstoned, Tombstoned)
                | (Tombstoned, Live)
                | (Tombstoned, Purged)
                | (Live, Purged)
        );
        if allowed {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, attempted: to })
        }
    }
}
