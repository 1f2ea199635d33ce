//! Forward/reverse wire mappers (`spec.md` §4.2): translate between the
//! user document shape (long attribute names) and the on-wire shape
//! (short names stable across a schema version).

use crate::ast::ParsedSchema;
use s3db_model::Value;
use std::collections::BTreeMap;

/// A generated, schema-version-scoped mapping between user attribute
/// names and their compact wire names.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapper {
    /// User name -> wire name.
    long_to_short: BTreeMap<String, String>,
    /// Wire name -> user name.
    short_to_long: BTreeMap<String, String>,
}

impl Mapper {
    /// Build a mapper by stable enumeration of a schema's top-level
    /// attribute names in sorted order: `a, b, ..., z, aa, ab, ...`. Only
    /// top-level attributes get short names; nested objects are
    /// JSON-encoded as a unit under their parent's short name.
    #[must_use]
    pub fn build(schema: &ParsedSchema) -> Self {
        let mut long_to_short = BTreeMap::new();
        let mut short_to_long = BTreeMap::new();
        for (index, name) in schema.attributes.keys().enumerate() {
            let short = short_name(index);
            long_to_short.insert(name.clone(), short.clone());
            short_to_long.insert(short, name.clone());
        }
        Self { long_to_short, short_to_long }
    }

    /// The short (wire) name for a user attribute, if it is declared.
    #[must_use]
    pub fn short_name(&self, long: &str) -> Option<&str> {
        self.long_to_short.get(long).map(String::as_str)
    }

    /// The user attribute name for a wire short name, if it is declared.
    #[must_use]
    pub fn long_name(&self, short: &str) -> Option<&str> {
        self.short_to_long.get(short).map(String::as_str)
    }

    /// The full name map, as stored in the catalog's `nameMap`.
    #[must_use]
    pub fn name_map(&self) -> BTreeMap<String, String> {
        self.long_to_short.clone()
    }

    /// Translate a user document into wire form (short-named keys).
    #[must_use]
    pub fn forward(&self, attributes: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        attributes
            .iter()
            .filter_map(|(name, value)| self.short_name(name).map(|short| (short.to_string(), value.clone())))
            .collect()
    }

    /// Translate a wire document back into user form (long-named keys).
    /// A pure rename: `wire`'s values must already be coerced to their
    /// declared `Value` variant (`behavior::reassemble` does that, using
    /// the schema this mapper was built from) before reaching here.
    #[must_use]
    pub fn reverse(&self, wire: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        wire.iter()
            .filter_map(|(short, value)| self.long_name(short).map(|long| (long.to_string(), value.clone())))
            .collect()
    }
}

/// Base-26 letter enumeration: 0 -> "a", 25 -> "z", 26 -> "aa", ...
fn short_name(mut index: usize) -> String {
    let mut chars = Vec::new();
    loop {
        let rem = index % 26;
        chars.push((b'a' + rem as u8) as char);
        index /= 26;
        if index == 0 {
            break;
        }
        index -= 1;
    }
    chars.iter().rev().collect()
}
