//! Shared types, error model, and configuration for noticemerge.
//!
//! This crate is the foundation depended on by all other noticemerge crates.
//! It provides:
//! - [`NoticeMergeError`], the unified error type
//! - Domain types ([`Fragment`], [`ConsolidatedDocument`], [`Release`], [`EntityKey`])
//! - Diagnostics records ([`MergeReport`], [`AssemblySummary`])
//! - Configuration ([`AppConfig`], [`AssemblyConfig`], config loading)

pub mod config;
pub mod error;
pub mod report;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, AssemblyConfig, ConflictMode, DefaultsConfig, PoliciesConfig, ProducerEntry,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{NoticeMergeError, Result};
pub use report::{
    AssemblySummary, ConflictRecord, ConflictResolution, MergeReport, ProducerOutcome,
    ProducerReport, ROOT_SCOPE, SkippedPatch,
};
pub use types::{ConsolidatedDocument, EntityKey, Fragment, Release, RunId, json_kind};
