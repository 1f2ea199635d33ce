//! The attribute DSL's abstract syntax tree.
//!
//! Mirrors the shape of `ruststack-dynamodb-core::expression::ast`: small
//! enums for the grammar's terminals (here, [`Primitive`] and [`Modifier`])
//! composed into a tree ([`AttributeNode`]) rather than parsed ad hoc at
//! validation time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A DSL primitive type token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    /// `string`
    String,
    /// `number`
    Number,
    /// `boolean`
    Boolean,
    /// `date`
    Date,
    /// `object` — only used for empty/untyped nested objects; declared
    /// nested objects instead carry children directly on [`AttributeNode`].
    Object,
    /// `array`, with the element type carried by `items:<type>`.
    Array(Box<Primitive>),
    /// `secret` or `secret:<len>` — encrypted-at-rest string.
    Secret {
        /// Declared ciphertext/plaintext length hint, if given.
        len: Option<usize>,
    },
    /// `embedding:<dims>` — a fixed-length float vector.
    Embedding {
        /// Vector dimensionality.
        dims: usize,
    },
}

/// A single DSL modifier token, e.g. `required`, `minlength:3`, `enum:a,b,c`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Modifier {
    /// `required`
    Required,
    /// `optional` (the default; accepted explicitly for readability)
    Optional,
    /// `default:<literal>`
    Default(String),
    /// `min:<n>`
    Min(f64),
    /// `max:<n>`
    Max(f64),
    /// `minlength:<n>`
    MinLength(usize),
    /// `maxlength:<n>`
    MaxLength(usize),
    /// `email`
    Email,
    /// `url`
    Url,
    /// `enum:a,b,c`
    Enum(Vec<String>),
    /// `truncatable` — eligible for `enforce-limits` truncation.
    Truncatable,
}

/// One parsed attribute: its primitive type, modifiers, and (for declared
/// nested objects) child attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeNode {
    /// The attribute's primitive type.
    pub primitive: Primitive,
    /// Modifiers attached to this attribute.
    pub modifiers: Vec<Modifier>,
    /// Child attributes, present only when this node is a declared nested object.
    pub children: Option<BTreeMap<String, AttributeNode>>,
}

impl AttributeNode {
    /// `true` if [`Modifier::Required`] is present.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.modifiers.iter().any(|m| matches!(m, Modifier::Required))
    }

    /// The declared default, if any.
    #[must_use]
    pub fn default_literal(&self) -> Option<&str> {
        self.modifiers.iter().find_map(|m| match m {
            Modifier::Default(d) => Some(d.as_str()),
            _ => None,
        })
    }
}

/// Either a DSL string (`"string|required"`) or a nested attribute map,
/// the two shapes the raw schema input may take per attribute
/// (`spec.md` §4.2: "Nested: objects may be declared via a nested map").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeSpec {
    /// A leaf DSL token string.
    Leaf(String),
    /// A nested object, recursively specified the same way.
    Nested(BTreeMap<String, AttributeSpec>),
}

/// A fully parsed schema: every attribute's AST plus declared partitions
/// and behavior, ready for validation, mapping, and hashing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSchema {
    /// Top-level attributes, keyed by name.
    pub attributes: BTreeMap<String, AttributeNode>,
    /// Declared behavior id (kept as a string here; `s3db-model::BehaviorKind`
    /// is the typed form used once mapped by the engine).
    pub behavior: String,
    /// Declared partition field lists, keyed by partition name.
    pub partitions: BTreeMap<String, Vec<String>>,
}
