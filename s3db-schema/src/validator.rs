//! Document validation against a [`ParsedSchema`].
//!
//! Accumulates every violated rule into a `Vec<ValidationIssue>` rather
//! than failing on the first one, per `spec.md` §4.2: "Validation errors
//! are structured: `{path, rule, expected, actual}`".

use crate::ast::{AttributeNode, Modifier, ParsedSchema, Primitive};
use s3db_model::Value;
use std::collections::BTreeMap;

/// One violated validation rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Dotted attribute path, e.g. `address.zip`.
    pub path: String,
    /// The rule that was violated, e.g. `"required"`, `"type"`, `"minlength"`.
    pub rule: String,
    /// A human-readable description of what was expected.
    pub expected: String,
    /// A human-readable description of what was found.
    pub actual: String,
}

/// Validate a document's attributes against a schema. Returns every
/// violation found; an empty `Err` never occurs — callers check `is_empty`.
pub fn validate(schema: &ParsedSchema, attributes: &BTreeMap<String, Value>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (name, node) in &schema.attributes {
        validate_attribute(name, node, attributes.get(name), &mut issues);
    }
    issues
}

fn validate_attribute(path: &str, node: &AttributeNode, value: Option<&Value>, issues: &mut Vec<ValidationIssue>) {
    let value = match value {
        Some(v) if !v.is_null() => v,
        _ => {
            if node.is_required() && node.default_literal().is_none() {
                issues.push(ValidationIssue {
                    path: path.to_string(),
                    rule: "required".to_string(),
                    expected: "present".to_string(),
                    actual: "missing".to_string(),
                });
            }
            return;
        }
    };

    match &node.primitive {
        Primitive::String => validate_string(path, node, value, issues),
        Primitive::Number => {
            if value.as_number().is_none() {
                type_mismatch(path, "number", value, issues);
            } else {
                validate_number(path, node, value, issues);
            }
        }
        Primitive::Boolean => {
            if !matches!(value, Value::Bool(_)) {
                type_mismatch(path, "boolean", value, issues);
            }
        }
        Primitive::Date => {
            if !matches!(value, Value::Date(_)) {
                type_mismatch(path, "date", value, issues);
            }
        }
        Primitive::Object => {
            let Value::Object(map) = value else {
                type_mismatch(path, "object", value, issues);
                return;
            };
            if let Some(children) = &node.children {
                for (name, child) in children {
                    let child_path = format!("{path}.{name}");
                    validate_attribute(&child_path, child, map.get(name), issues);
                }
            }
        }
        Primitive::Array(item) => {
            let Value::Array(items) = value else {
                type_mismatch(path, "array", value, issues);
                return;
            };
            for (idx, item_value) in items.iter().enumerate() {
                let matches = match item.as_ref() {
                    Primitive::String => item_value.as_str().is_some(),
                    Primitive::Number => item_value.as_number().is_some(),
                    Primitive::Boolean => matches!(item_value, Value::Bool(_)),
                    Primitive::Date => matches!(item_value, Value::Date(_)),
                    _ => true,
                };
                if !matches {
                    issues.push(ValidationIssue {
                        path: format!("{path}[{idx}]"),
                        rule: "type".to_string(),
                        expected: format!("{item:?}"),
                        actual: item_value.type_name().to_string(),
                    });
                }
            }
        }
        Primitive::Secret { len } => {
            let Some(s) = value.as_str() else {
                type_mismatch(path, "string (secret)", value, issues);
                return;
            };
            if let Some(expected_len) = len {
                if s.len() != *expected_len {
                    issues.push(ValidationIssue {
                        path: path.to_string(),
                        rule: "secret_len".to_string(),
                        expected: expected_len.to_string(),
                        actual: s.len().to_string(),
                    });
                }
            }
        }
        Primitive::Embedding { dims } => {
            let Value::Embedding(vec) = value else {
                type_mismatch(path, "embedding", value, issues);
                return;
            };
            if vec.len() != *dims {
                issues.push(ValidationIssue {
                    path: path.to_string(),
                    rule: "embedding_dims".to_string(),
                    expected: dims.to_string(),
                    actual: vec.len().to_string(),
                });
            }
        }
    }
}

fn validate_string(path: &str, node: &AttributeNode, value: &Value, issues: &mut Vec<ValidationIssue>) {
    let Some(s) = value.as_str() else {
        type_mismatch(path, "string", value, issues);
        return;
    };
    for modifier in &node.modifiers {
        match modifier {
            Modifier::MinLength(min) if s.len() < *min => issues.push(ValidationIssue {
                path: path.to_string(),
                rule: "minlength".to_string(),
                expected: format!(">= {min}"),
                actual: s.len().to_string(),
            }),
            Modifier::MaxLength(max) if s.len() > *max => issues.push(ValidationIssue {
                path: path.to_string(),
                rule: "maxlength".to_string(),
                expected: format!("<= {max}"),
                actual: s.len().to_string(),
            }),
            Modifier::Email if !looks_like_email(s) => issues.push(ValidationIssue {
                path: path.to_string(),
                rule: "email".to_string(),
                expected: "a valid email address".to_string(),
                actual: s.to_string(),
            }),
            Modifier::Url if !looks_like_url(s) => issues.push(ValidationIssue {
                path: path.to_string(),
                rule: "url".to_string(),
                expected: "a valid URL".to_string(),
                actual: s.to_string(),
            }),
            Modifier::Enum(allowed) if !allowed.iter().any(|a| a == s) => issues.push(ValidationIssue {
                path: path.to_string(),
                rule: "enum".to_string(),
                expected: allowed.join(","),
                actual: s.to_string(),
            }),
            _ => {}
        }
    }
}

fn validate_number(path: &str, node: &AttributeNode, value: &Value, issues: &mut Vec<ValidationIssue>) {
    let n = value.as_number().expect("checked by caller");
    for modifier in &node.modifiers {
        match modifier {
            Modifier::Min(min) if n < *min => issues.push(ValidationIssue {
                path: path.to_string(),
                rule: "min".to_string(),
                expected: format!(">= {min}"),
                actual: n.to_string(),
            }),
            Modifier::Max(max) if n > *max => issues.push(ValidationIssue {
                path: path.to_string(),
                rule: "max".to_string(),
                expected: format!("<= {max}"),
                actual: n.to_string(),
            }),
            _ => {}
        }
    }
}

fn type_mismatch(path: &str, expected: &str, actual: &Value, issues: &mut Vec<ValidationIssue>) {
    issues.push(ValidationIssue {
        path: path.to_string(),
        rule: "type".to_string(),
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    });
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn looks_like_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}
