//! Entity key resolution and key-uniqueness checks.

use std::collections::HashMap;

use serde_json::Value;

use noticemerge_shared::{EntityKey, json_kind};

use crate::policy::{CollectionSpec, PolicyTable};

/// Why an entity patch has no usable key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("patch is a {0}, expected an object")]
    NotAnObject(&'static str),

    #[error("missing key field '{0}'")]
    Missing(String),

    #[error("key field '{0}' is empty")]
    Empty(String),

    #[error("key field '{field}' is a {kind}, expected string or number")]
    Invalid { field: String, kind: &'static str },
}

/// Resolve the key of `entity` within `collection`.
///
/// Every declared key field must hold a non-empty string or a number.
pub fn key_of(collection: &CollectionSpec, entity: &Value) -> Result<EntityKey, KeyError> {
    let Value::Object(fields) = entity else {
        return Err(KeyError::NotAnObject(json_kind(entity)));
    };

    let key = collection.key_fields();
    let mut parts = Vec::with_capacity(key.len());
    for name in key {
        let part = match fields.get(name) {
            None | Some(Value::Null) => return Err(KeyError::Missing(name.clone())),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(KeyError::Empty(name.clone()));
            }
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(KeyError::Invalid {
                    field: name.clone(),
                    kind: json_kind(other),
                });
            }
        };
        parts.push(part);
    }
    Ok(EntityKey(parts))
}

/// Walk a dotted path through nested objects.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| node.get(segment))
}

/// A declared collection in a document that breaks key uniqueness or keying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyViolation {
    pub collection: String,
    pub index: usize,
    pub problem: String,
}

impl std::fmt::Display for KeyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]: {}", self.collection, self.index, self.problem)
    }
}

/// Check every declared collection present in `document` for unresolvable or
/// duplicate keys.
pub fn check_keys(table: &PolicyTable, document: &Value) -> Vec<KeyViolation> {
    let mut violations = Vec::new();

    for spec in &table.collections {
        let Some(value) = lookup_path(document, &spec.path) else {
            continue;
        };
        let Value::Array(entities) = value else {
            violations.push(KeyViolation {
                collection: spec.path.clone(),
                index: 0,
                problem: format!("collection is a {}, expected array", json_kind(value)),
            });
            continue;
        };

        let mut first_seen: HashMap<EntityKey, usize> = HashMap::new();
        for (index, entity) in entities.iter().enumerate() {
            match key_of(spec, entity) {
                Ok(key) => {
                    if let Some(first) = first_seen.get(&key) {
                        violations.push(KeyViolation {
                            collection: spec.path.clone(),
                            index,
                            problem: format!("duplicate key '{key}' (first at #{first})"),
                        });
                    } else {
                        first_seen.insert(key, index);
                    }
                }
                Err(e) => violations.push(KeyViolation {
                    collection: spec.path.clone(),
                    index,
                    problem: e.to_string(),
                }),
            }
        }
    }

    violations
}
