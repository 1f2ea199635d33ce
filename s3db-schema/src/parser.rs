//! Recursive-descent parser from the raw [`AttributeSpec`] tree (DSL
//! strings plus nested maps) into a [`ParsedSchema`].

use crate::ast::{AttributeNode, AttributeSpec, Modifier, ParsedSchema, Primitive};
use crate::error::{SchemaError, SchemaResult};
use std::collections::BTreeMap;

/// Parse a full schema: the raw per-attribute spec map, the declared
/// behavior id, and declared partitions.
pub fn parse_schema(
    spec: &BTreeMap<String, AttributeSpec>,
    behavior: impl Into<String>,
    partitions: BTreeMap<String, Vec<String>>,
) -> SchemaResult<ParsedSchema> {
    let mut attributes = BTreeMap::new();
    for (name, node) in spec {
        attributes.insert(name.clone(), parse_attribute(name, node)?);
    }
    Ok(ParsedSchema { attributes, behavior: behavior.into(), partitions })
}

/// Parse one attribute spec (leaf DSL string or nested map) into its AST.
pub fn parse_attribute(path: &str, spec: &AttributeSpec) -> SchemaResult<AttributeNode> {
    match spec {
        AttributeSpec::Leaf(dsl) => parse_leaf(path, dsl),
        AttributeSpec::Nested(children) => {
            let mut parsed_children = BTreeMap::new();
            for (name, child) in children {
                let child_path = format!("{path}.{name}");
                parsed_children.insert(name.clone(), parse_attribute(&child_path, child)?);
            }
            Ok(AttributeNode {
                primitive: Primitive::Object,
                modifiers: Vec::new(),
                children: Some(parsed_children),
            })
        }
    }
}

fn parse_leaf(path: &str, dsl: &str) -> SchemaResult<AttributeNode> {
    let mut tokens = dsl.split('|').map(str::trim).filter(|t| !t.is_empty());

    let primitive_token = tokens
        .next()
        .ok_or_else(|| SchemaError::MalformedDeclaration { path: path.to_string(), reason: "empty declaration".into() })?;

    let rest: Vec<&str> = tokens.collect();

    let primitive = match split_head(primitive_token) {
        ("string", None) => Primitive::String,
        ("number", None) => Primitive::Number,
        ("boolean", None) => Primitive::Boolean,
        ("date", None) => Primitive::Date,
        ("object", None) => Primitive::Object,
        ("array", None) => {
            let items_token = rest
                .iter()
                .find_map(|t| t.strip_prefix("items:"))
                .ok_or_else(|| SchemaError::MalformedDeclaration {
                    path: path.to_string(),
                    reason: "array requires items:<type>".into(),
                })?;
            Primitive::Array(Box::new(parse_item_primitive(path, items_token)?))
        }
        ("secret", len) => Primitive::Secret {
            len: len.map(|l| parse_usize(path, "secret", l)).transpose()?,
        },
        ("embedding", Some(dims)) => Primitive::Embedding { dims: parse_usize(path, "embedding", dims)? },
        ("embedding", None) => {
            return Err(SchemaError::MalformedDeclaration {
                path: path.to_string(),
                reason: "embedding requires dimensions, e.g. embedding:128".into(),
            });
        }
        (other, _) => return Err(SchemaError::UnknownToken(other.to_string())),
    };

    let modifiers = rest
        .iter()
        .filter(|t| !t.starts_with("items:"))
        .map(|t| parse_modifier(path, t))
        .collect::<SchemaResult<Vec<_>>>()?;

    Ok(AttributeNode { primitive, modifiers, children: None })
}

fn parse_item_primitive(path: &str, token: &str) -> SchemaResult<Primitive> {
    match token {
        "string" => Ok(Primitive::String),
        "number" => Ok(Primitive::Number),
        "boolean" => Ok(Primitive::Boolean),
        "date" => Ok(Primitive::Date),
        other => Err(SchemaError::MalformedDeclaration {
            path: path.to_string(),
            reason: format!("unsupported array item type: {other}"),
        }),
    }
}

fn split_head(token: &str) -> (&str, Option<&str>) {
    match token.split_once(':') {
        Some((head, arg)) => (head, Some(arg)),
        None => (token, None),
    }
}

fn parse_modifier(path: &str, token: &str) -> SchemaResult<Modifier> {
    let (head, arg) = split_head(token);
    match (head, arg) {
        ("required", None) => Ok(Modifier::Required),
        ("optional", None) => Ok(Modifier::Optional),
        ("truncatable", None) => Ok(Modifier::Truncatable),
        ("email", None) => Ok(Modifier::Email),
        ("url", None) => Ok(Modifier::Url),
        ("default", Some(lit)) => Ok(Modifier::Default(lit.to_string())),
        ("min", Some(n)) => Ok(Modifier::Min(parse_f64(path, "min", n)?)),
        ("max", Some(n)) => Ok(Modifier::Max(parse_f64(path, "max", n)?)),
        ("minlength", Some(n)) => Ok(Modifier::MinLength(parse_usize(path, "minlength", n)?)),
        ("maxlength", Some(n)) => Ok(Modifier::MaxLength(parse_usize(path, "maxlength", n)?)),
        ("enum", Some(list)) => Ok(Modifier::Enum(list.split(',').map(str::to_string).collect())),
        _ => Err(SchemaError::UnknownToken(token.to_string())),
    }
}

fn parse_usize(path: &str, modifier: &str, raw: &str) -> SchemaResult<usize> {
    raw.parse().map_err(|_| SchemaError::InvalidModifierArgument {
        token: format!("{path}:{modifier}"),
        reason: format!("expected an unsigned integer, got {raw:?}"),
    })
}

fn parse_f64(path: &str, modifier: &str, raw: &str) -> SchemaResult<f64> {
    raw.parse().map_err(|_| SchemaError::InvalidModifierArgument {
        token: format!("{path}:{modifier}"),
        reason: format!("expected a number, got {raw:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(s: &str) -> AttributeSpec {
        AttributeSpec::Leaf(s.to_string())
    }

    #[test]
    fn test_should_parse_simple_required_string() {
        let node = parse_attribute("name", &leaf("string|required")).expect("parses");
        assert_eq!(node.primitive, Primitive::String);
        assert!(node.is_required());
    }

    #[test]
    fn test_should_parse_minlength_modifier() {
        let node = parse_attribute("name", &leaf("string|required|minlength:3")).expect("parses");
        assert!(node.modifiers.contains(&Modifier::MinLength(3)));
    }

    #[test]
    fn test_should_parse_secret_with_length() {
        let node = parse_attribute("apiKey", &leaf("secret:32")).expect("parses");
        assert_eq!(node.primitive, Primitive::Secret { len: Some(32) });
    }

    #[test]
    fn test_should_parse_bare_secret() {
        let node = parse_attribute("apiKey", &leaf("secret")).expect("parses");
        assert_eq!(node.primitive, Primitive::Secret { len: None });
    }

    #[test]
    fn test_should_parse_embedding() {
        let node = parse_attribute("vector", &leaf("embedding:128")).expect("parses");
        assert_eq!(node.primitive, Primitive::Embedding { dims: 128 });
    }

    #[test]
    fn test_should_require_embedding_dims() {
        let err = parse_attribute("vector", &leaf("embedding")).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedDeclaration { .. }));
    }

    #[test]
    fn test_should_parse_array_with_items() {
        let node = parse_attribute("tags", &leaf("array|items:string")).expect("parses");
        assert_eq!(node.primitive, Primitive::Array(Box::new(Primitive::String)));
    }

    #[test]
    fn test_should_parse_enum_modifier() {
        let node = parse_attribute("status", &leaf("string|enum:active,inactive")).expect("parses");
        assert!(node.modifiers.contains(&Modifier::Enum(vec!["active".into(), "inactive".into()])));
    }

    #[test]
    fn test_should_reject_unknown_primitive() {
        let err = parse_attribute("x", &leaf("blob")).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownToken(t) if t == "blob"));
    }

    #[test]
    fn test_should_reject_non_numeric_minlength() {
        let err = parse_attribute("x", &leaf("string|minlength:abc")).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidModifierArgument { .. }));
    }

    #[test]
    fn test_should_parse_nested_object() {
        let spec = AttributeSpec::Nested(BTreeMap::from([
            ("street".to_string(), leaf("string|required")),
            ("zip".to_string(), leaf("string|minlength:5")),
        ]));
        let node = parse_attribute("address", &spec).expect("parses");
        let children = node.children.expect("has children");
        assert!(children.contains_key("street"));
        assert!(children["street"].is_required());
    }

    #[test]
    fn test_should_parse_schema_with_partitions() {
        let mut spec = BTreeMap::new();
        spec.insert("tenantId".to_string(), leaf("string|required"));
        spec.insert("userId".to_string(), leaf("string|required"));
        let partitions =
            BTreeMap::from([("byTenantUser".to_string(), vec!["tenantId".to_string(), "userId".to_string()])]);
        let schema = parse_schema(&spec, "body-overflow", partitions).expect("parses");
        assert_eq!(schema.behavior, "body-overflow");
        assert_eq!(schema.partitions["byTenantUser"], vec!["tenantId", "userId"]);
    }
}
