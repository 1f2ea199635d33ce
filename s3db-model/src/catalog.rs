//! The schema catalog (`<prefix>/s3db.json`), per `spec.md` §6.

use crate::behavior::BehaviorKind;
use crate::partition::PartitionDef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One immutable schema version, referenced from every document via `_v`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersionRecord {
    /// Raw DSL attribute declarations, keyed by attribute path.
    pub attributes: BTreeMap<String, String>,
    /// The split policy this version was declared with.
    pub behavior: BehaviorKind,
    /// Declared secondary indexes.
    pub partitions: Vec<PartitionDef>,
    /// Stable short-name wire mapping: user attribute name -> short name.
    pub name_map: BTreeMap<String, String>,
    /// This version's stable hash (see `s3db_schema::version`).
    pub hash: String,
    /// Whether delete tombstones (`true`) or purges immediately (`false`)
    /// for this version, carried here so the option survives a reconnect
    /// (`spec.md` §3: "Resource ... options (timestamps, paranoid,
    /// asyncPartitions)" are per-resource declared state, not derivable).
    #[serde(default = "default_paranoid")]
    pub paranoid: bool,
    /// When this version was created.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

fn default_paranoid() -> bool {
    true
}

/// A resource's entry in the catalog: its current version plus full history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCatalogEntry {
    /// Hash of the currently-active schema version.
    pub current_version: String,
    /// All schema versions ever declared for this resource, keyed by hash.
    pub versions: BTreeMap<String, SchemaVersionRecord>,
}

impl ResourceCatalogEntry {
    /// The currently active schema version record.
    #[must_use]
    pub fn current(&self) -> Option<&SchemaVersionRecord> {
        self.versions.get(&self.current_version)
    }
}

/// The full catalog persisted at `<prefix>/s3db.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Catalog format version, for forward compatibility.
    pub version: u32,
    /// Registered resources, keyed by name.
    pub resources: BTreeMap<String, ResourceCatalogEntry>,
}

impl Catalog {
    /// An empty catalog at format version 1, written on first connect.
    #[must_use]
    pub fn empty() -> Self {
        Self { version: 1, resources: BTreeMap::new() }
    }
}
