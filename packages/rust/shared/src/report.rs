//! Diagnostics records produced by merges and assemblies.
//!
//! These are plain structured records, serialized to `summary.json` next to
//! each written release.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::RunId;

/// Collection label used in diagnostics for top-level fields.
pub const ROOT_SCOPE: &str = "$root";

// ---------------------------------------------------------------------------
// Merge-level records
// ---------------------------------------------------------------------------

/// An entity patch that was dropped without touching the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPatch {
    /// Collection path the patch was addressed to.
    pub collection: String,
    /// Position of the patch within the fragment's array.
    pub index: usize,
    /// Human-readable reason.
    pub reason: String,
}

/// How a policy conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Existing value left unchanged.
    Kept,
    /// Downgraded to replace: incoming value written.
    Replaced,
}

/// A field whose existing and incoming values were incompatible under its policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Collection path, or [`ROOT_SCOPE`] for top-level fields.
    pub collection: String,
    /// Entity key, absent for top-level fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Dotted field path within the entity (or document root).
    pub field: String,
    /// Policy that could not be applied.
    pub policy: String,
    pub existing: Value,
    pub incoming: Value,
    pub resolution: ConflictResolution,
}

/// Outcome of merging one fragment into a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Entities appended as new.
    pub created: usize,
    /// Existing entities updated by a patch.
    pub touched: usize,
    /// Top-level fields written outside any collection.
    pub fields_set: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedPatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictRecord>,
}

// ---------------------------------------------------------------------------
// Assembly-level records
// ---------------------------------------------------------------------------

/// What happened when a producer ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ProducerOutcome {
    /// A fragment was produced and merged.
    Merged,
    /// The producer found nothing in the notice.
    Absent,
    /// The producer errored or panicked; treated as absent.
    Failed { message: String },
}

/// Per-producer diagnostics within one assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerReport {
    /// Registered producer name.
    pub name: String,
    pub outcome: ProducerOutcome,
    #[serde(flatten)]
    pub merge: MergeReport,
}

/// Per-notice summary of one assembly run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblySummary {
    pub run_id: RunId,
    pub notice_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub producers: Vec<ProducerReport>,
}

impl AssemblySummary {
    pub fn created(&self) -> usize {
        self.producers.iter().map(|p| p.merge.created).sum()
    }

    pub fn touched(&self) -> usize {
        self.producers.iter().map(|p| p.merge.touched).sum()
    }

    pub fn skipped(&self) -> usize {
        self.producers.iter().map(|p| p.merge.skipped.len()).sum()
    }

    pub fn conflicts(&self) -> usize {
        self.producers.iter().map(|p| p.merge.conflicts.len()).sum()
    }

    /// Names of producers whose extraction failed.
    pub fn failed_producers(&self) -> Vec<&str> {
        self.producers
            .iter()
            .filter(|p| matches!(p.outcome, ProducerOutcome::Failed { .. }))
            .map(|p| p.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(name: &str, outcome: ProducerOutcome, created: usize, touched: usize) -> ProducerReport {
        ProducerReport {
            name: name.into(),
            outcome,
            merge: MergeReport {
                created,
                touched,
                ..MergeReport::default()
            },
        }
    }

    #[test]
    fn summary_totals_and_failures() {
        let summary = AssemblySummary {
            run_id: RunId::new(),
            notice_id: "notice-1".into(),
            started_at: Utc::now(),
            elapsed_ms: 3,
            producers: vec![
                report("bt-500", ProducerOutcome::Merged, 2, 0),
                report("bt-11", ProducerOutcome::Merged, 0, 2),
                report("bt-13", ProducerOutcome::Absent, 0, 0),
                report(
                    "bt-99",
                    ProducerOutcome::Failed {
                        message: "boom".into(),
                    },
                    0,
                    0,
                ),
            ],
        };
        assert_eq!(summary.created(), 2);
        assert_eq!(summary.touched(), 2);
        assert_eq!(summary.failed_producers(), vec!["bt-99"]);
    }

    #[test]
    fn producer_report_serializes_flat() {
        let value = serde_json::to_value(report("bt-500", ProducerOutcome::Absent, 0, 0)).unwrap();
        assert_eq!(value["outcome"], json!({"status": "absent"}));
        assert_eq!(value["created"], 0);
        assert!(value.get("skipped").is_none());
    }
}
