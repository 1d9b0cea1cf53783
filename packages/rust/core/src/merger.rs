//! Fragment merger: applies one fragment to the consolidated document.
//!
//! For each declared collection in the fragment, entity patches are upserted
//! by key; every other top-level field is merged with replace / deep-merge
//! semantics. Field policies come from the [`PolicyTable`].
//!
//! Failures are isolated per patch and per field:
//! - a patch without a usable key is skipped and recorded,
//! - a field whose values conflict under its policy is kept (or replaced, in
//!   [`ConflictMode::Replace`]) and recorded; sibling fields still merge.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{instrument, trace, warn};

use noticemerge_shared::{
    ConflictMode, ConflictRecord, ConflictResolution, ConsolidatedDocument, EntityKey, Fragment,
    MergeReport, NoticeMergeError, ROOT_SCOPE, SkippedPatch, json_kind,
};

use crate::key::key_of;
use crate::policy::{self, CollectionSpec, Policy, PolicyTable, Scope};

/// Location of a field being merged: document root, or one keyed entity.
#[derive(Clone, Copy)]
struct Site<'a> {
    collection: Option<&'a CollectionSpec>,
    key: Option<&'a EntityKey>,
}

impl<'a> Site<'a> {
    const ROOT: Self = Site {
        collection: None,
        key: None,
    };

    fn scope(&self) -> Scope<'a> {
        match self.collection {
            Some(spec) => Scope::Collection(&spec.path),
            None => Scope::Root,
        }
    }

    fn collection_label(&self) -> String {
        self.collection
            .map(|c| c.path.clone())
            .unwrap_or_else(|| ROOT_SCOPE.to_string())
    }
}

/// Merges fragments into a document according to a policy table.
#[derive(Debug, Clone)]
pub struct FragmentMerger {
    table: Arc<PolicyTable>,
    on_conflict: ConflictMode,
}

impl FragmentMerger {
    pub fn new(table: Arc<PolicyTable>, on_conflict: ConflictMode) -> Self {
        Self { table, on_conflict }
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    pub fn on_conflict(&self) -> ConflictMode {
        self.on_conflict
    }

    /// Merge `fragment` into `document`, returning what changed.
    #[instrument(level = "debug", skip_all)]
    pub fn merge(&self, document: &mut ConsolidatedDocument, fragment: &Fragment) -> MergeReport {
        let mut report = MergeReport::default();
        let root = document.root_mut();

        for (name, incoming) in fragment.iter() {
            if incoming.is_null() {
                continue;
            }
            if self.table.collection(name).is_none() {
                report.fields_set += 1;
            }
            self.merge_field(Site::ROOT, root, name, name, incoming, &mut report);
        }

        report
    }

    /// Merge one field of `slot`. `path` is the field's dotted path within
    /// its scope.
    fn merge_field(
        &self,
        site: Site<'_>,
        slot: &mut Map<String, Value>,
        name: &str,
        path: &str,
        incoming: &Value,
        report: &mut MergeReport,
    ) {
        if incoming.is_null() {
            return;
        }

        if site.collection.is_none() {
            if let Some(spec) = self.table.collection(path) {
                if let Some(target) = slot.get_mut(name) {
                    self.merge_collection(spec, target, incoming, report);
                    return;
                }
            }
        }

        match slot.get_mut(name) {
            Some(existing) if !existing.is_null() => {
                self.combine(site, path, existing, incoming, report);
            }
            _ => {
                if let Some(value) = self.introduce(site, path, incoming, report) {
                    slot.insert(name.to_string(), value);
                }
            }
        }
    }

    /// Upsert every entity patch of `incoming` into the collection array `target`.
    fn merge_collection(
        &self,
        spec: &CollectionSpec,
        target: &mut Value,
        incoming: &Value,
        report: &mut MergeReport,
    ) {
        let Value::Array(patches) = incoming else {
            self.skip(
                spec,
                0,
                format!("collection must be an array, got {}", json_kind(incoming)),
                report,
            );
            return;
        };

        if target.is_null() {
            *target = Value::Array(Vec::new());
        }
        if !target.is_array() {
            let reason = format!("document holds a {} at this collection path", json_kind(target));
            for index in 0..patches.len() {
                self.skip(spec, index, reason.clone(), report);
            }
            return;
        }
        let Some(entities) = target.as_array_mut() else {
            return;
        };

        let mut positions: HashMap<EntityKey, usize> = entities
            .iter()
            .enumerate()
            .filter_map(|(i, entity)| key_of(spec, entity).ok().map(|key| (key, i)))
            .collect();

        for (index, patch) in patches.iter().enumerate() {
            let key = match key_of(spec, patch) {
                Ok(key) => key,
                Err(e) => {
                    self.skip(spec, index, e.to_string(), report);
                    continue;
                }
            };
            let Value::Object(fields) = patch else {
                continue;
            };

            match positions.get(&key).copied() {
                Some(position) => {
                    let Some(entity) = entities[position].as_object_mut() else {
                        continue;
                    };
                    let site = Site {
                        collection: Some(spec),
                        key: Some(&key),
                    };
                    for (name, value) in fields {
                        if !spec.is_key_field(name) {
                            self.merge_field(site, entity, name, name, value, report);
                        }
                    }
                    report.touched += 1;
                    trace!(collection = %spec.path, %key, "updated entity");
                }
                None => {
                    let site = Site {
                        collection: Some(spec),
                        key: Some(&key),
                    };
                    let mut entity = Map::with_capacity(fields.len());
                    for (name, value) in fields {
                        if value.is_null() {
                            continue;
                        }
                        let value = if spec.is_key_field(name) {
                            Some(value.clone())
                        } else {
                            self.introduce(site, name, value, report)
                        };
                        if let Some(value) = value {
                            entity.insert(name.clone(), value);
                        }
                    }
                    trace!(collection = %spec.path, %key, "created entity");
                    positions.insert(key, entities.len());
                    entities.push(Value::Object(entity));
                    report.created += 1;
                }
            }
        }
    }

    /// Combine an existing non-null value with an incoming one.
    fn combine(
        &self,
        site: Site<'_>,
        path: &str,
        existing: &mut Value,
        incoming: &Value,
        report: &mut MergeReport,
    ) {
        let policy = self
            .table
            .field_policy(site.scope(), path)
            .cloned()
            .unwrap_or_else(|| Policy::default_for(existing, incoming));

        let combined = match &policy {
            Policy::Replace => {
                if let Some(value) = self.introduce(site, path, incoming, report) {
                    *existing = value;
                }
                return;
            }
            Policy::FirstWins => return,
            Policy::DeepMerge => {
                if let (Some(target), Some(patch)) = (existing.as_object_mut(), incoming.as_object())
                {
                    for (name, value) in patch {
                        let child = format!("{path}.{name}");
                        self.merge_field(site, target, name, &child, value, report);
                    }
                    return;
                }
                Err(policy::Mismatch(format!(
                    "deep-merge needs two objects, got {} and {}",
                    json_kind(existing),
                    json_kind(incoming)
                )))
            }
            Policy::UnionSet => policy::union_set(existing, incoming),
            Policy::AppendDistinct { key } => policy::append_distinct(existing, incoming, key),
        };

        match combined {
            Ok(value) => *existing = value,
            Err(mismatch) => self.conflict(site, path, &policy, existing, incoming, mismatch, report),
        }
    }

    /// Build the stored form of a value entering the document for the first
    /// time: nested collections are keyed, union sets sorted, append-distinct
    /// arrays deduplicated, nulls dropped.
    ///
    /// Returns `None` when nothing should be stored: a collection patch that
    /// is not an array is skipped without leaving a slot behind.
    fn introduce(
        &self,
        site: Site<'_>,
        path: &str,
        incoming: &Value,
        report: &mut MergeReport,
    ) -> Option<Value> {
        if site.collection.is_none() {
            if let Some(spec) = self.table.collection(path) {
                let mut target = Value::Array(Vec::new());
                self.merge_collection(spec, &mut target, incoming, report);
                return incoming.is_array().then_some(target);
            }
        }

        let empty = Value::Array(Vec::new());
        match self.table.field_policy(site.scope(), path) {
            Some(Policy::UnionSet) => {
                return Some(policy::union_set(&empty, incoming).unwrap_or_else(|_| incoming.clone()));
            }
            Some(Policy::AppendDistinct { key }) => {
                return Some(
                    policy::append_distinct(&empty, incoming, key)
                        .unwrap_or_else(|_| incoming.clone()),
                );
            }
            _ => {}
        }

        match incoming {
            Value::Object(fields) => {
                let mut out = Map::with_capacity(fields.len());
                for (name, value) in fields {
                    if value.is_null() {
                        continue;
                    }
                    let child = format!("{path}.{name}");
                    if let Some(value) = self.introduce(site, &child, value, report) {
                        out.insert(name.clone(), value);
                    }
                }
                Some(Value::Object(out))
            }
            other => Some(other.clone()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn conflict(
        &self,
        site: Site<'_>,
        path: &str,
        policy: &Policy,
        existing: &mut Value,
        incoming: &Value,
        mismatch: policy::Mismatch,
        report: &mut MergeReport,
    ) {
        let err = NoticeMergeError::PolicyConflict {
            collection: site.collection_label(),
            key: site.key.map(ToString::to_string).unwrap_or_default(),
            field: path.to_string(),
            reason: format!("{policy}: {mismatch}"),
        };
        let record = ConflictRecord {
            collection: site.collection_label(),
            key: site.key.map(ToString::to_string),
            field: path.to_string(),
            policy: policy.name().to_string(),
            existing: existing.clone(),
            incoming: incoming.clone(),
            resolution: match self.on_conflict {
                ConflictMode::Keep => ConflictResolution::Kept,
                ConflictMode::Replace => ConflictResolution::Replaced,
            },
        };

        match self.on_conflict {
            ConflictMode::Keep => {
                warn!(error = %err, existing = %existing, incoming = %incoming, "keeping existing value");
            }
            ConflictMode::Replace => {
                warn!(error = %err, existing = %existing, incoming = %incoming, "replacing existing value");
                if let Some(value) = self.introduce(site, path, incoming, report) {
                    *existing = value;
                }
            }
        }
        report.conflicts.push(record);
    }

    fn skip(&self, spec: &CollectionSpec, index: usize, reason: String, report: &mut MergeReport) {
        let err = NoticeMergeError::MalformedFragment {
            collection: spec.path.clone(),
            index,
            reason: reason.clone(),
        };
        warn!(error = %err, "skipping entity patch");
        report.skipped.push(SkippedPatch {
            collection: spec.path.clone(),
            index,
            reason,
        });
    }
}
