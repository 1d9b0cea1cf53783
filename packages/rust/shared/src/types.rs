//! Core domain types: fragments, the consolidated document, and keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{NoticeMergeError, Result};

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one assembly run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// EntityKey
// ---------------------------------------------------------------------------

/// Resolved identity of one entity within a collection.
///
/// Single-field keys hold one part; compound keys hold one part per key field,
/// in declaration order. Numeric key values are stored in their JSON text form,
/// so `"1"` and `1` resolve to the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(pub Vec<String>);

impl EntityKey {
    /// Key made of a single part.
    pub fn single(part: impl Into<String>) -> Self {
        Self(vec![part.into()])
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("|"))
    }
}

// ---------------------------------------------------------------------------
// Fragment
// ---------------------------------------------------------------------------

/// An immutable, partial view of the target document emitted by one producer.
///
/// Keys are either declared collection paths (holding arrays of entity patches)
/// or top-level fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fragment(Map<String, Value>);

impl Fragment {
    /// Wrap an already-built JSON object.
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Interpret producer output. `null` and `{}` mean "no data".
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            Value::Object(map) => Ok(Some(Self(map))),
            other => Err(NoticeMergeError::parse(format!(
                "fragment must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Parse a fragment from JSON text. Blank text means "no data".
    pub fn from_json_str(text: &str) -> Result<Option<Self>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(text)
            .map_err(|e| NoticeMergeError::parse(format!("invalid fragment JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

// ---------------------------------------------------------------------------
// ConsolidatedDocument
// ---------------------------------------------------------------------------

/// The accumulating result of one notice's assembly.
///
/// Owned by exactly one assembly; mutated only by the fragment merger and
/// frozen into a [`Release`] once every producer has run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidatedDocument {
    root: Map<String, Value>,
}

impl ConsolidatedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Freeze the document for downstream consumers.
    pub fn finalize(self) -> Release {
        Release {
            value: Value::Object(self.root),
        }
    }
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

/// A finalized, read-only consolidated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Release {
    value: Value,
}

impl Release {
    pub fn as_value(&self) -> &Value {
        &self.value
    }

    /// Serialize to JSON text.
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let text = if pretty {
            serde_json::to_string_pretty(&self.value)
        } else {
            serde_json::to_string(&self.value)
        };
        text.map_err(|e| NoticeMergeError::validation(format!("JSON serialization failed: {e}")))
    }

    /// Hex SHA-256 of the compact JSON form. Stable because field order is preserved.
    pub fn sha256(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.to_json(false)?.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Short name of a JSON value's type, for diagnostics.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn fragment_absent_forms() {
        assert!(Fragment::from_value(Value::Null).unwrap().is_none());
        assert!(Fragment::from_value(json!({})).unwrap().is_none());
        assert!(Fragment::from_json_str("   \n").unwrap().is_none());
        assert!(Fragment::from_json_str("null").unwrap().is_none());
    }

    #[test]
    fn fragment_rejects_non_object() {
        let err = Fragment::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("got array"));

        let err = Fragment::from_json_str("{not json").unwrap_err();
        assert!(err.to_string().contains("invalid fragment JSON"));
    }

    #[test]
    fn fragment_preserves_field_order() {
        let fragment = Fragment::from_json_str(r#"{"parties": [], "lots": [], "tender": {}}"#)
            .unwrap()
            .unwrap();
        let keys: Vec<&str> = fragment.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["parties", "lots", "tender"]);
    }

    #[test]
    fn compound_key_display() {
        let key = EntityKey(vec!["awa-cri-des".into(), "LOT-0001".into()]);
        assert_eq!(key.to_string(), "awa-cri-des|LOT-0001");
        assert_eq!(EntityKey::single("ORG-1").to_string(), "ORG-1");
    }

    #[test]
    fn release_hash_is_stable() {
        let mut doc = ConsolidatedDocument::new();
        doc.root_mut().insert("ocid".into(), json!("ocds-abc-1"));
        let release = doc.finalize();

        let a = release.sha256().unwrap();
        let b = release.clone().sha256().unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert_eq!(release.as_value()["ocid"], "ocds-abc-1");
    }
}
