//! Error types for noticemerge.
//!
//! Library crates use [`NoticeMergeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all noticemerge operations.
#[derive(Debug, thiserror::Error)]
pub enum NoticeMergeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// JSON or TOML parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invariant violated in a written release, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An entity patch could not be keyed; the patch is dropped.
    #[error("malformed fragment in '{collection}' (patch #{index}): {reason}")]
    MalformedFragment {
        collection: String,
        index: usize,
        reason: String,
    },

    /// Existing and incoming values are structurally incompatible under a policy.
    #[error("policy conflict on {collection}[{key}].{field}: {reason}")]
    PolicyConflict {
        collection: String,
        key: String,
        field: String,
        reason: String,
    },

    /// A producer failed while extracting its fragment.
    #[error("producer '{producer}' failed: {message}")]
    ProducerFailure { producer: String, message: String },

    /// A batch worker task failed to complete.
    #[error("worker error: {0}")]
    Worker(String),

    /// The notice itself cannot be loaded; assembly never starts.
    #[error("malformed notice '{notice}': {message}")]
    MalformedNotice { notice: String, message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NoticeMergeError>;

impl NoticeMergeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// A producer failure attributed to `producer`.
    pub fn producer(producer: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ProducerFailure {
            producer: producer.into(),
            message: msg.into(),
        }
    }

    /// A notice that cannot be loaded at all.
    pub fn notice(notice: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedNotice {
            notice: notice.into(),
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = NoticeMergeError::config("unknown on_conflict mode");
        assert_eq!(err.to_string(), "config error: unknown on_conflict mode");

        let err = NoticeMergeError::MalformedFragment {
            collection: "parties".into(),
            index: 2,
            reason: "missing key field 'id'".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed fragment in 'parties' (patch #2): missing key field 'id'"
        );

        let err = NoticeMergeError::producer("bt-11", "boom");
        assert!(err.to_string().contains("'bt-11'"));
    }
}
