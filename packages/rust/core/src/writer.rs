//! Release writer and checker.
//!
//! Writes one directory per assembled notice:
//! ```text
//! <output_root>/<notice_id>/
//! ├── release.json
//! └── summary.json
//! ```
//! Both files are written atomically (temp file, then rename).

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use noticemerge_shared::{NoticeMergeError, Result};

use crate::key::{KeyViolation, check_keys};
use crate::pipeline::Assembly;
use crate::policy::PolicyTable;

pub const RELEASE_FILE: &str = "release.json";
pub const SUMMARY_FILE: &str = "summary.json";

/// Where and what a release was written.
#[derive(Debug, Clone)]
pub struct WrittenRelease {
    /// Directory holding the release and its summary.
    pub dir: PathBuf,
    pub release_path: PathBuf,
    pub summary_path: PathBuf,
    /// Hex SHA-256 of the written `release.json` bytes.
    pub sha256: String,
    pub size_bytes: usize,
}

/// Write `assembly` under `output_root`, replacing any previous release for
/// the same notice.
#[instrument(skip_all, fields(notice = %assembly.summary.notice_id))]
pub fn write_assembly(output_root: &Path, assembly: &Assembly, pretty: bool) -> Result<WrittenRelease> {
    let dir = output_root.join(dir_name(&assembly.summary.notice_id));
    std::fs::create_dir_all(&dir).map_err(|e| NoticeMergeError::io(&dir, e))?;

    let release = assembly.release.to_json(pretty)?;
    let release_path = dir.join(RELEASE_FILE);
    write_atomic(&release_path, &release)?;

    let summary = to_json(&assembly.summary, pretty)?;
    let summary_path = dir.join(SUMMARY_FILE);
    write_atomic(&summary_path, &summary)?;

    let mut hasher = Sha256::new();
    hasher.update(release.as_bytes());
    let sha256 = format!("{:x}", hasher.finalize());

    info!(path = %release_path.display(), size = release.len(), "release written");

    Ok(WrittenRelease {
        dir,
        release_path,
        summary_path,
        sha256,
        size_bytes: release.len(),
    })
}

/// Outcome of checking a written release.
#[derive(Debug, Clone, Default)]
pub struct ReleaseCheck {
    /// Declared collections found in the release.
    pub collections: Vec<String>,
    /// Entities checked across those collections.
    pub entities: usize,
    pub violations: Vec<KeyViolation>,
}

impl ReleaseCheck {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Re-read a release file and verify every declared collection has
/// resolvable, pairwise-distinct keys.
pub fn check_release(table: &PolicyTable, path: &Path) -> Result<ReleaseCheck> {
    let content = std::fs::read_to_string(path).map_err(|e| NoticeMergeError::io(path, e))?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        NoticeMergeError::validation(format!("invalid {}: {e}", path.display()))
    })?;
    if !value.is_object() {
        return Err(NoticeMergeError::validation(format!(
            "{} is not a JSON object",
            path.display()
        )));
    }

    let mut check = ReleaseCheck::default();
    for spec in &table.collections {
        if let Some(entities) = crate::key::lookup_path(&value, &spec.path) {
            check.collections.push(spec.path.clone());
            check.entities += entities.as_array().map_or(0, Vec::len);
        }
    }
    check.violations = check_keys(table, &value);

    debug!(
        path = %path.display(),
        collections = check.collections.len(),
        violations = check.violations.len(),
        "release checked"
    );
    Ok(check)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Directory name for a notice id: path separators and other unsafe
/// characters become `_`.
fn dir_name(notice_id: &str) -> String {
    let name: String = notice_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        "notice".to_string()
    } else {
        name
    }
}

fn to_json<T: serde::Serialize>(data: &T, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(data)
    } else {
        serde_json::to_string(data)
    };
    text.map_err(|e| NoticeMergeError::validation(format!("JSON serialization failed: {e}")))
}

/// Write to a hidden temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| NoticeMergeError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| NoticeMergeError::io(path, e))?;

    debug!(path = %path.display(), size = content.len(), "wrote file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use noticemerge_shared::{ConflictMode, Fragment};
    use serde_json::json;

    use crate::merger::FragmentMerger;
    use crate::pipeline::AssemblyPipeline;
    use crate::producer::{Notice, ProducerRegistry};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nm-writer-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    struct Fixed(&'static str);

    impl Notice for Fixed {
        fn notice_id(&self) -> &str {
            self.0
        }
    }

    fn assembly(notice_id: &'static str) -> Assembly {
        let merger = FragmentMerger::new(Arc::new(PolicyTable::builtin()), ConflictMode::Keep);
        let producers = ProducerRegistry::new().with_fn("parties", |_: &Fixed| {
            Fragment::from_value(json!({
                "parties": [{"id": "ORG-1", "name": "Acme", "roles": ["buyer"]}],
                "tender": {"lots": [{"id": "LOT-1"}, {"id": "LOT-2"}]}
            }))
        });
        AssemblyPipeline::new(merger, producers).assemble(&Fixed(notice_id))
    }

    #[test]
    fn writes_release_and_summary() {
        let tmp = temp_dir();
        let assembly = assembly("2024-OJS-0001");

        let written = write_assembly(&tmp, &assembly, true).unwrap();
        assert_eq!(written.dir, tmp.join("2024-OJS-0001"));
        assert!(written.release_path.exists());
        assert!(written.summary_path.exists());
        assert!(!written.dir.join(".release.json.tmp").exists());

        let release: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written.release_path).unwrap()).unwrap();
        assert_eq!(&release, assembly.release.as_value());

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written.summary_path).unwrap()).unwrap();
        assert_eq!(summary["notice_id"], "2024-OJS-0001");
        assert_eq!(summary["producers"][0]["outcome"]["status"], "merged");
        assert_eq!(summary["producers"][0]["created"], 3);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn compact_hash_matches_release_hash() {
        let tmp = temp_dir();
        let assembly = assembly("N-1");
        let written = write_assembly(&tmp, &assembly, false).unwrap();
        assert_eq!(written.sha256, assembly.release.sha256().unwrap());
        assert_eq!(
            written.size_bytes,
            std::fs::metadata(&written.release_path).unwrap().len() as usize
        );
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rewrite_replaces_previous_release() {
        let tmp = temp_dir();
        let first = write_assembly(&tmp, &assembly("N-1"), true).unwrap();
        let second = write_assembly(&tmp, &assembly("N-1"), true).unwrap();
        assert_eq!(first.release_path, second.release_path);
        assert_eq!(first.sha256, second.sha256);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn dir_name_is_sanitized() {
        assert_eq!(dir_name("2024/OJS 123"), "2024_OJS_123");
        assert_eq!(dir_name("../etc"), ".._etc");
        assert_eq!(dir_name(".."), "notice");
        assert_eq!(dir_name("  "), "notice");
        assert_eq!(dir_name("a.b-c_d"), "a.b-c_d");
    }

    #[test]
    fn check_written_release_is_clean() {
        let tmp = temp_dir();
        let written = write_assembly(&tmp, &assembly("N-1"), true).unwrap();

        let check = check_release(&PolicyTable::builtin(), &written.release_path).unwrap();
        assert!(check.is_clean());
        assert_eq!(check.collections, vec!["parties", "tender.lots"]);
        assert_eq!(check.entities, 3);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn check_reports_duplicate_keys() {
        let tmp = temp_dir();
        let path = tmp.join("release.json");
        std::fs::write(
            &path,
            r#"{"parties": [{"id": "ORG-1"}, {"id": "ORG-1"}], "awards": [{"title": "x"}]}"#,
        )
        .unwrap();

        let check = check_release(&PolicyTable::builtin(), &path).unwrap();
        assert!(!check.is_clean());
        assert_eq!(check.violations.len(), 2);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn check_rejects_non_object() {
        let tmp = temp_dir();
        let path = tmp.join("release.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(check_release(&PolicyTable::builtin(), &path).is_err());

        std::fs::write(&path, "{not json").unwrap();
        assert!(check_release(&PolicyTable::builtin(), &path).is_err());

        assert!(check_release(&PolicyTable::builtin(), &tmp.join("missing.json")).is_err());
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
