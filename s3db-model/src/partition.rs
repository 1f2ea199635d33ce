//! Partition declarations and reference keys (`spec.md` §4.4), modeled on
//! the teacher's key-schema types
//! (`ruststack-dynamodb-core::storage::{KeySchema,KeyAttribute}`).

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named secondary index: an ordered list of field names that together
/// form the partition key, e.g. `byTenantUser{tenantId,userId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionDef {
    /// Partition name, unique within a resource.
    pub name: String,
    /// Ordered field names that make up this partition's key.
    pub fields: Vec<String>,
}

impl PartitionDef {
    /// Create a new partition declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<String>) -> Self {
        Self { name: name.into(), fields }
    }

    /// Compute the ordered `(field, stringified value)` pairs for this
    /// partition given a document's attributes, or `None` if any field the
    /// partition needs is missing from `attributes` (the document does not
    /// participate in this partition).
    #[must_use]
    pub fn resolve(&self, attributes: &BTreeMap<String, Value>) -> Option<Vec<(String, String)>> {
        let mut out = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = attributes.get(field)?;
            if value.is_null() {
                return None;
            }
            out.push((field.clone(), value.to_wire_string()));
        }
        Some(out)
    }
}

/// A resolved pointer into a partition: the key layout from `spec.md`
/// §4.4 is `<prefix>/resource=<name>/partition=<P>/<k1>=<v1>/.../id=<X>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRef {
    /// Owning resource name.
    pub resource: String,
    /// Partition name.
    pub partition: String,
    /// Ordered `(field, value)` pairs resolved for this document.
    pub values: Vec<(String, String)>,
    /// The document id this ref points to.
    pub id: String,
}

impl PartitionRef {
    /// Build the storage key for this ref.
    #[must_use]
    pub fn storage_key(&self, prefix: &str) -> String {
        let mut key = format!(
            "{}/resource={}/partition={}",
            prefix.trim_end_matches('/'),
            self.resource,
            self.partition
        );
        for (field, value) in &self.values {
            key.push('/');
            key.push_str(field);
            key.push('=');
            key.push_str(value);
        }
        key.push_str("/id=");
        key.push_str(&self.id);
        key
    }

    /// Build the key prefix all refs for a given partition+values tuple
    /// share, used by `listPartition` to do an O(prefix) list.
    #[must_use]
    pub fn scan_prefix(prefix: &str, resource: &str, partition: &str, values: &[(String, String)]) -> String {
        let mut key = format!("{}/resource={resource}/partition={partition}", prefix.trim_end_matches('/'));
        for (field, value) in values {
            key.push('/');
            key.push_str(field);
            key.push('=');
            key.push_str(value);
        }
        key
    }
}
