//! Merge engine and assembly pipeline for noticemerge.
//!
//! Producers turn a notice into fragments; the fragment merger folds each
//! fragment into one consolidated document under a declarative policy table.
//! The batch runner assembles many notices concurrently and the writer puts
//! finished releases on disk.

pub mod batch;
pub mod key;
pub mod merger;
pub mod pipeline;
pub mod policy;
pub mod producer;
pub mod writer;

pub use batch::assemble_all;
pub use key::{KeyError, KeyViolation, check_keys, key_of};
pub use merger::FragmentMerger;
pub use pipeline::{Assembly, AssemblyPipeline, AssemblyProgress, SilentProgress};
pub use policy::{CollectionSpec, Policy, PolicyTable};
pub use producer::{FallbackProducer, FnProducer, Notice, Producer, ProducerRegistry};
pub use writer::{ReleaseCheck, WrittenRelease, check_release, write_assembly};
