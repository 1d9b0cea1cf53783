//! Assembly pipeline: notice → producers → merger → release.
//!
//! One notice is assembled strictly sequentially against a single document
//! owned by the call. Producers run in registration order; each non-absent
//! fragment is merged before the next producer runs.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use noticemerge_shared::{
    AssemblySummary, ConsolidatedDocument, Fragment, MergeReport, NoticeMergeError,
    ProducerOutcome, ProducerReport, Release, Result, RunId,
};

use crate::merger::FragmentMerger;
use crate::producer::{Notice, Producer, ProducerRegistry};

/// Result of assembling one notice.
#[derive(Debug, Clone)]
pub struct Assembly {
    /// The finalized consolidated document.
    pub release: Release,
    /// Per-producer diagnostics.
    pub summary: AssemblySummary,
}

/// Progress callback for reporting batch status.
pub trait AssemblyProgress: Send + Sync {
    /// Called once before any notice is assembled.
    fn started(&self, total: usize);
    /// Called when a notice's assembly has finished.
    fn finished(&self, summary: &AssemblySummary, completed: usize, total: usize);
    /// Called when every notice has been assembled.
    fn done(&self, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl AssemblyProgress for SilentProgress {
    fn started(&self, _total: usize) {}
    fn finished(&self, _summary: &AssemblySummary, _completed: usize, _total: usize) {}
    fn done(&self, _total: usize) {}
}

/// A merger plus an ordered producer list. Immutable once built, so one
/// pipeline can be shared across concurrent assemblies.
pub struct AssemblyPipeline<N> {
    merger: FragmentMerger,
    producers: ProducerRegistry<N>,
}

impl<N: Notice> AssemblyPipeline<N> {
    pub fn new(merger: FragmentMerger, producers: ProducerRegistry<N>) -> Self {
        Self { merger, producers }
    }

    pub fn merger(&self) -> &FragmentMerger {
        &self.merger
    }

    pub fn producers(&self) -> &ProducerRegistry<N> {
        &self.producers
    }

    /// Run every producer over `notice` and merge the results.
    ///
    /// Producer errors and panics are caught, recorded as failures and
    /// treated as absent fragments; assembly always completes.
    #[instrument(skip_all, fields(notice = %notice.notice_id()))]
    pub fn assemble(&self, notice: &N) -> Assembly {
        let start = Instant::now();
        let run_id = RunId::new();
        let started_at = chrono::Utc::now();

        info!(%run_id, producers = self.producers.len(), "starting assembly");

        let mut document = ConsolidatedDocument::new();
        let mut reports = Vec::with_capacity(self.producers.len());

        for producer in self.producers.iter() {
            let name = producer.name().to_string();
            let (outcome, merge) = match run_producer(producer, notice) {
                Ok(Some(fragment)) => {
                    let report = self.merger.merge(&mut document, &fragment);
                    debug!(
                        producer = %name,
                        created = report.created,
                        touched = report.touched,
                        skipped = report.skipped.len(),
                        conflicts = report.conflicts.len(),
                        "merged fragment"
                    );
                    (ProducerOutcome::Merged, report)
                }
                Ok(None) => {
                    debug!(producer = %name, "no fragment");
                    (ProducerOutcome::Absent, MergeReport::default())
                }
                Err(e) => {
                    warn!(producer = %name, error = %e, "producer failed, treating as absent");
                    let message = match e {
                        NoticeMergeError::ProducerFailure { message, .. } => message,
                        other => other.to_string(),
                    };
                    (ProducerOutcome::Failed { message }, MergeReport::default())
                }
            };
            reports.push(ProducerReport {
                name,
                outcome,
                merge,
            });
        }

        let summary = AssemblySummary {
            run_id,
            notice_id: notice.notice_id().to_string(),
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            producers: reports,
        };

        info!(
            run_id = %summary.run_id,
            created = summary.created(),
            touched = summary.touched(),
            skipped = summary.skipped(),
            conflicts = summary.conflicts(),
            failed = summary.failed_producers().len(),
            elapsed_ms = summary.elapsed_ms,
            "assembly complete"
        );

        Assembly {
            release: document.finalize(),
            summary,
        }
    }
}

/// Call one producer, converting errors and panics into `ProducerFailure`.
/// Empty fragments count as absent.
fn run_producer<N>(producer: &dyn Producer<N>, notice: &N) -> Result<Option<Fragment>> {
    match panic::catch_unwind(AssertUnwindSafe(|| producer.extract(notice))) {
        Ok(Ok(fragment)) => Ok(fragment.filter(|f| !f.is_empty())),
        Ok(Err(e @ NoticeMergeError::ProducerFailure { .. })) => Err(e),
        Ok(Err(e)) => Err(NoticeMergeError::producer(producer.name(), e.to_string())),
        Err(payload) => Err(NoticeMergeError::producer(
            producer.name(),
            format!("panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use noticemerge_shared::ConflictMode;
    use serde_json::{Value, json};

    use crate::policy::PolicyTable;
    use crate::producer::FnProducer;

    /// A notice whose producers each read one pre-parsed JSON value.
    struct Sections {
        id: String,
        sections: Vec<(&'static str, Value)>,
    }

    impl Sections {
        fn new(sections: Vec<(&'static str, Value)>) -> Self {
            Self {
                id: "2024-OJS-0001".into(),
                sections,
            }
        }

        fn section(&self, name: &str) -> Option<&Value> {
            self.sections.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
        }
    }

    impl Notice for Sections {
        fn notice_id(&self) -> &str {
            &self.id
        }
    }

    fn section_producer(
        name: &'static str,
    ) -> FnProducer<Sections, impl Fn(&Sections) -> Result<Option<Fragment>> + Send + Sync> {
        FnProducer::new(name, move |notice: &Sections| match notice.section(name) {
            Some(value) => Fragment::from_value(value.clone()),
            None => Ok(None),
        })
    }

    fn pipeline(names: &[&'static str]) -> AssemblyPipeline<Sections> {
        let merger = FragmentMerger::new(Arc::new(PolicyTable::builtin()), ConflictMode::Keep);
        let mut producers = ProducerRegistry::new();
        for name in names {
            producers.register(section_producer(*name));
        }
        AssemblyPipeline::new(merger, producers)
    }

    #[test]
    fn assembles_in_registration_order() {
        let notice = Sections::new(vec![
            ("organizations", json!({"parties": [{"id": "ORG-1", "name": "Acme"}]})),
            ("tenderers", json!({"parties": [{"id": "ORG-1", "roles": ["tenderer"]}]})),
        ]);
        let assembly = pipeline(&["organizations", "tenderers"]).assemble(&notice);

        assert_eq!(
            assembly.release.as_value(),
            &json!({"parties": [{"id": "ORG-1", "name": "Acme", "roles": ["tenderer"]}]})
        );
        let summary = &assembly.summary;
        assert_eq!(summary.notice_id, "2024-OJS-0001");
        assert_eq!(summary.created(), 1);
        assert_eq!(summary.touched(), 1);
        assert_eq!(summary.producers[0].name, "organizations");
        assert_eq!(summary.producers[1].outcome, ProducerOutcome::Merged);
    }

    #[test]
    fn later_producer_wins_replace() {
        let notice = Sections::new(vec![
            ("a", json!({"tender": {"title": "first"}})),
            ("b", json!({"tender": {"title": "second"}})),
        ]);
        let forward = pipeline(&["a", "b"]).assemble(&notice);
        let backward = pipeline(&["b", "a"]).assemble(&notice);
        assert_eq!(forward.release.as_value()["tender"]["title"], "second");
        assert_eq!(backward.release.as_value()["tender"]["title"], "first");
    }

    #[test]
    fn absent_and_empty_fragments() {
        let notice = Sections::new(vec![
            ("nulled", Value::Null),
            ("empty", json!({})),
            ("lots", json!({"lots": [{"id": "LOT-1"}]})),
        ]);
        let assembly = pipeline(&["missing", "nulled", "empty", "lots"]).assemble(&notice);
        let outcomes: Vec<_> = assembly
            .summary
            .producers
            .iter()
            .map(|p| p.outcome.clone())
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ProducerOutcome::Absent,
                ProducerOutcome::Absent,
                ProducerOutcome::Absent,
                ProducerOutcome::Merged,
            ]
        );
        assert_eq!(assembly.summary.created(), 1);
    }

    #[test]
    fn failing_producer_is_isolated() {
        let notice = Sections::new(vec![
            ("bad", json!(["not", "an", "object"])),
            ("lots", json!({"lots": [{"id": "LOT-1"}]})),
        ]);
        let assembly = pipeline(&["bad", "lots"]).assemble(&notice);

        assert_eq!(assembly.summary.failed_producers(), vec!["bad"]);
        match &assembly.summary.producers[0].outcome {
            ProducerOutcome::Failed { message } => {
                assert!(message.contains("fragment must be a JSON object"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(assembly.release.as_value(), &json!({"lots": [{"id": "LOT-1"}]}));
    }

    #[test]
    fn panicking_producer_is_isolated() {
        let merger = FragmentMerger::new(Arc::new(PolicyTable::builtin()), ConflictMode::Keep);
        let producers = ProducerRegistry::new()
            .with_fn("explodes", |_: &Sections| -> Result<Option<Fragment>> {
                panic!("index out of range")
            })
            .with(section_producer("lots"));
        let notice = Sections::new(vec![("lots", json!({"lots": [{"id": "LOT-1"}]}))]);

        let assembly = AssemblyPipeline::new(merger, producers).assemble(&notice);
        match &assembly.summary.producers[0].outcome {
            ProducerOutcome::Failed { message } => {
                assert_eq!(message, "panicked: index out of range")
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(assembly.summary.created(), 1);
    }

    #[test]
    fn skipped_patches_are_reported_per_producer() {
        let notice = Sections::new(vec![(
            "parties",
            json!({"parties": [{"name": "no id"}, {"id": "ORG-2"}]}),
        )]);
        let assembly = pipeline(&["parties"]).assemble(&notice);
        let report = &assembly.summary.producers[0];
        assert_eq!(report.merge.created, 1);
        assert_eq!(report.merge.skipped.len(), 1);
        assert_eq!(report.merge.skipped[0].index, 0);
        assert_eq!(assembly.summary.skipped(), 1);
    }

    #[test]
    fn no_producers_yields_empty_release() {
        let assembly = pipeline(&[]).assemble(&Sections::new(vec![]));
        assert_eq!(assembly.release.as_value(), &json!({}));
        assert!(assembly.summary.producers.is_empty());
    }
}
