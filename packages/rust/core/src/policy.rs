//! Field merge policies and the declarative policy table.
//!
//! A [`PolicyTable`] maps `(collection path | root, dotted field path)` to a
//! [`Policy`]. The leaf combinators here ([`union_set`], [`append_distinct`])
//! are pure: they never mutate their inputs and never partially apply.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use noticemerge_shared::{NoticeMergeError, Result, json_kind};

/// Key field used when a collection does not declare one.
pub const DEFAULT_KEY_FIELD: &str = "id";

static DEFAULT_KEY: LazyLock<Vec<String>> = LazyLock::new(|| vec![DEFAULT_KEY_FIELD.to_string()]);

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// How two values for the same field are combined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum Policy {
    /// New value wins unconditionally.
    Replace,
    /// Both mappings; merged key by key.
    DeepMerge,
    /// Both arrays of scalars; sorted, deduplicated union.
    UnionSet,
    /// Arrays of items; incoming items appended unless an equal one exists.
    /// Equality uses the listed item fields, or the whole item when empty.
    AppendDistinct {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        key: Vec<String>,
    },
    /// Existing value is kept.
    FirstWins,
}

impl Policy {
    /// Stable name used in diagnostics and config files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::DeepMerge => "deep-merge",
            Self::UnionSet => "union-set",
            Self::AppendDistinct { .. } => "append-distinct",
            Self::FirstWins => "first-wins",
        }
    }

    /// `append-distinct` keyed by the given item fields.
    pub fn append_distinct_by(fields: &[&str]) -> Self {
        Self::AppendDistinct {
            key: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// Policy used when none is declared, chosen from the value shapes.
    pub fn default_for(existing: &Value, incoming: &Value) -> Self {
        match (existing, incoming) {
            (Value::Object(_), Value::Object(_)) => Self::DeepMerge,
            (Value::Array(_), Value::Array(_)) => Self::AppendDistinct { key: Vec::new() },
            _ => Self::Replace,
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Leaf combinators
// ---------------------------------------------------------------------------

/// Why two values could not be combined under a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch(pub String);

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deduplicated union of two arrays of scalars, in sorted order.
pub fn union_set(existing: &Value, incoming: &Value) -> std::result::Result<Value, Mismatch> {
    let left = scalar_items(existing, "existing")?;
    let right = scalar_items(incoming, "incoming")?;

    let mut items: Vec<Value> = left.iter().chain(right.iter()).cloned().collect();
    // Ties (`1` and `1.0`) break on text so the survivor does not depend on input order.
    items.sort_by(|a, b| compare_scalars(a, b).then_with(|| a.to_string().cmp(&b.to_string())));
    items.dedup_by(|a, b| compare_scalars(a, b) == Ordering::Equal);
    Ok(Value::Array(items))
}

/// Append incoming items not already present under the item key.
pub fn append_distinct(
    existing: &Value,
    incoming: &Value,
    key: &[String],
) -> std::result::Result<Value, Mismatch> {
    let Value::Array(current) = existing else {
        return Err(Mismatch(format!(
            "existing value is {}, expected array",
            json_kind(existing)
        )));
    };
    let Value::Array(new_items) = incoming else {
        return Err(Mismatch(format!(
            "incoming value is {}, expected array",
            json_kind(incoming)
        )));
    };

    let mut seen: Vec<Value> = current.iter().map(|item| item_identity(item, key)).collect();
    let mut merged = current.clone();
    for item in new_items {
        let identity = item_identity(item, key);
        if !seen.contains(&identity) {
            seen.push(identity);
            merged.push(item.clone());
        }
    }
    Ok(Value::Array(merged))
}

fn scalar_items<'a>(value: &'a Value, side: &str) -> std::result::Result<&'a [Value], Mismatch> {
    let Value::Array(items) = value else {
        return Err(Mismatch(format!(
            "{side} value is {}, expected array of scalars",
            json_kind(value)
        )));
    };
    if let Some(bad) = items.iter().find(|v| scalar_rank(v).is_none()) {
        return Err(Mismatch(format!(
            "{side} array holds a {}, expected scalars",
            json_kind(bad)
        )));
    }
    Ok(items)
}

fn item_identity(item: &Value, key: &[String]) -> Value {
    match item {
        Value::Object(fields) if !key.is_empty() => Value::Array(
            key.iter()
                .map(|k| fields.get(k).cloned().unwrap_or(Value::Null))
                .collect(),
        ),
        _ => item.clone(),
    }
}

fn scalar_rank(value: &Value) -> Option<u8> {
    match value {
        Value::Bool(_) => Some(0),
        Value::Number(_) => Some(1),
        Value::String(_) => Some(2),
        _ => None,
    }
}

/// Total order over scalars: booleans, then numbers, then strings.
fn compare_scalars(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => scalar_rank(a).cmp(&scalar_rank(b)),
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Where a field lives: the document root or an entity of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Root,
    Collection(&'a str),
}

/// Declaration of one keyed collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Dotted path from the document root (e.g. `parties`, `tender.lots`).
    pub path: String,
    /// Key fields; more than one makes a compound key. `None` means `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<String>>,
    /// Per-field policies, by dotted path within the entity.
    #[serde(default)]
    pub fields: BTreeMap<String, Policy>,
}

impl CollectionSpec {
    /// A collection keyed by `id` with no declared field policies.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: None,
            fields: BTreeMap::new(),
        }
    }

    /// Replace the key fields.
    pub fn keyed_by(mut self, fields: &[&str]) -> Self {
        self.key = Some(fields.iter().map(|f| (*f).to_string()).collect());
        self
    }

    /// Effective key fields.
    pub fn key_fields(&self) -> &[String] {
        self.key.as_deref().unwrap_or(DEFAULT_KEY.as_slice())
    }

    /// Declare a field policy.
    pub fn field(mut self, path: &str, policy: Policy) -> Self {
        self.fields.insert(path.to_string(), policy);
        self
    }

    pub fn is_key_field(&self, name: &str) -> bool {
        self.key_fields().iter().any(|k| k == name)
    }
}

/// The declarative `(collection, field) -> policy` table consumed by the merger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Policies for fields outside any collection, by dotted path from the root.
    #[serde(default)]
    pub root: BTreeMap<String, Policy>,
    /// Keyed collections.
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
}

impl PolicyTable {
    /// An empty table: no collections, defaults everywhere.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in table for OCDS releases assembled from eForms notices.
    pub fn builtin() -> Self {
        let parties = |path: &str| {
            CollectionSpec::new(path)
                .field("roles", Policy::UnionSet)
                .field("name", Policy::FirstWins)
                .field(
                    "details.classifications",
                    Policy::append_distinct_by(&["scheme", "id"]),
                )
                .field(
                    "additionalIdentifiers",
                    Policy::append_distinct_by(&["scheme", "id"]),
                )
                .field("beneficialOwners", Policy::append_distinct_by(&["id"]))
        };
        let lots = |path: &str| {
            CollectionSpec::new(path)
                .field("contractPeriod", Policy::DeepMerge)
                .field("items", Policy::append_distinct_by(&["id"]))
                .field("notes", Policy::append_distinct_by(&["text", "language"]))
                .field("awardCriteria.criteria", Policy::append_distinct_by(&[]))
        };
        let lot_groups =
            |path: &str| CollectionSpec::new(path).field("relatedLots", Policy::UnionSet);
        let bids = |path: &str| {
            CollectionSpec::new(path)
                .field("relatedLots", Policy::UnionSet)
                .field("tenderers", Policy::append_distinct_by(&["id"]))
        };

        Self {
            root: BTreeMap::from([
                ("tender.contractPeriod".to_string(), Policy::DeepMerge),
                (
                    "tender.documents".to_string(),
                    Policy::append_distinct_by(&["id"]),
                ),
            ]),
            collections: vec![
                parties("parties"),
                lots("lots"),
                lots("tender.lots"),
                lot_groups("lotGroups"),
                lot_groups("tender.lotGroups"),
                bids("bids.details"),
                CollectionSpec::new("awards")
                    .field("relatedLots", Policy::UnionSet)
                    .field("relatedBids", Policy::UnionSet)
                    .field("suppliers", Policy::append_distinct_by(&["id"]))
                    .field("buyers", Policy::append_distinct_by(&["id"]))
                    .field("items", Policy::append_distinct_by(&["id"])),
                CollectionSpec::new("contracts")
                    .field("awardIDs", Policy::UnionSet)
                    .field("relatedBids", Policy::UnionSet)
                    .field("signatories", Policy::append_distinct_by(&["id"])),
                CollectionSpec::new("withheldInformation"),
            ],
        }
    }

    /// Parse a table from TOML text and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let table: Self = toml::from_str(text)
            .map_err(|e| NoticeMergeError::config(format!("invalid policy table: {e}")))?;
        table.validate()?;
        Ok(table)
    }

    /// Load a table from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| NoticeMergeError::io(path, e))?;
        let table = Self::from_toml_str(&content).map_err(|e| {
            NoticeMergeError::config(format!("{}: {e}", path.display()))
        })?;
        debug!(
            path = %path.display(),
            collections = table.collections.len(),
            root_fields = table.root.len(),
            "loaded policy table"
        );
        Ok(table)
    }

    /// Render the table as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| NoticeMergeError::config(e.to_string()))
    }

    /// Overlay another table: its collections extend field policies collection
    /// by collection and replace keys they declare; its root policies win.
    pub fn overlay(&mut self, other: PolicyTable) {
        self.root.extend(other.root);
        for incoming in other.collections {
            match self.collections.iter_mut().find(|c| c.path == incoming.path) {
                Some(existing) => {
                    if incoming.key.is_some() {
                        existing.key = incoming.key;
                    }
                    existing.fields.extend(incoming.fields);
                }
                None => self.collections.push(incoming),
            }
        }
    }

    /// Check structural consistency of the table.
    pub fn validate(&self) -> Result<()> {
        for (i, spec) in self.collections.iter().enumerate() {
            if spec.path.is_empty() || spec.path.split('.').any(str::is_empty) {
                return Err(NoticeMergeError::config(format!(
                    "collection #{i} has an invalid path '{}'",
                    spec.path
                )));
            }
            let key = spec.key_fields();
            if key.is_empty() || key.iter().any(String::is_empty) {
                return Err(NoticeMergeError::config(format!(
                    "collection '{}' must declare at least one non-empty key field",
                    spec.path
                )));
            }
            if self.collections[..i].iter().any(|c| c.path == spec.path) {
                return Err(NoticeMergeError::config(format!(
                    "collection '{}' is declared twice",
                    spec.path
                )));
            }
            if let Some(field) = key.iter().find(|k| spec.fields.contains_key(k.as_str())) {
                return Err(NoticeMergeError::config(format!(
                    "collection '{}' declares a policy for its key field '{field}'",
                    spec.path
                )));
            }
            if self.root.contains_key(&spec.path) {
                return Err(NoticeMergeError::config(format!(
                    "'{}' is both a collection and a root field policy",
                    spec.path
                )));
            }
            if let Some(inner) = self
                .collections
                .iter()
                .find(|c| c.path.strip_prefix(spec.path.as_str()).is_some_and(|rest| rest.starts_with('.')))
            {
                return Err(NoticeMergeError::config(format!(
                    "collection '{}' is nested under collection '{}'",
                    inner.path, spec.path
                )));
            }
        }
        Ok(())
    }

    /// Collection declared at exactly this dotted path.
    pub fn collection(&self, path: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.path == path)
    }

    /// Declared policy for a field, if any.
    pub fn field_policy(&self, scope: Scope<'_>, field_path: &str) -> Option<&Policy> {
        match scope {
            Scope::Root => self.root.get(field_path),
            Scope::Collection(path) => self.collection(path)?.fields.get(field_path),
        }
    }
}
