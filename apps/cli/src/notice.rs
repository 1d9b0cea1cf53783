//! Notice directories and the file-backed producers that read them.
//!
//! A notice directory holds one JSON fragment file per producer. Every
//! `*.json` file is read up front, so extraction itself never touches disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use noticemerge_core::{FallbackProducer, Notice, Producer, ProducerRegistry};
use noticemerge_shared::{Fragment, NoticeMergeError, ProducerEntry, Result};
use tracing::{debug, warn};

/// One notice loaded from disk.
pub(crate) struct NoticeDir {
    id: String,
    /// File name → contents, or the read error for that file.
    files: BTreeMap<String, std::result::Result<String, String>>,
}

impl NoticeDir {
    /// Read every `*.json` file in `path`. Fails only when the directory
    /// itself cannot be listed.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        if !path.is_dir() {
            return Err(NoticeMergeError::notice(&id, format!("{} is not a directory", path.display())));
        }
        let entries = std::fs::read_dir(path).map_err(|e| NoticeMergeError::notice(&id, e.to_string()))?;

        let mut files = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| NoticeMergeError::notice(&id, e.to_string()))?;
            let file_path = entry.path();
            if !file_path.is_file() || file_path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let content = std::fs::read_to_string(&file_path).map_err(|e| {
                warn!(notice = %id, file = %name, error = %e, "unreadable fragment file");
                e.to_string()
            });
            files.insert(name, content);
        }

        debug!(notice = %id, files = files.len(), "notice loaded");
        Ok(Self { id, files })
    }

    /// Stems of the fragment files present, e.g. `organizations` for
    /// `organizations.json`.
    pub(crate) fn stems(&self) -> impl Iterator<Item = &str> {
        self.files.keys().filter_map(|name| name.strip_suffix(".json"))
    }

    fn file(&self, name: &str) -> Option<&std::result::Result<String, String>> {
        self.files.get(name)
    }
}

impl Notice for NoticeDir {
    fn notice_id(&self) -> &str {
        &self.id
    }
}

/// Reads one fragment file from a notice directory.
///
/// Missing, blank or `null` files are absent; unreadable or unparsable files
/// are producer failures.
pub(crate) struct FileProducer {
    name: String,
    file: String,
}

impl FileProducer {
    pub(crate) fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
        }
    }
}

impl Producer<NoticeDir> for FileProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, notice: &NoticeDir) -> Result<Option<Fragment>> {
        match notice.file(&self.file) {
            None => Ok(None),
            Some(Err(e)) => Err(NoticeMergeError::producer(&self.name, format!("{}: {e}", self.file))),
            Some(Ok(text)) => Fragment::from_json_str(text)
                .map_err(|e| NoticeMergeError::producer(&self.name, format!("{}: {e}", self.file))),
        }
    }
}

/// Build the producer list: configured entries in order, or one producer per
/// fragment file stem found across `notices`, sorted by name.
pub(crate) fn build_registry(entries: &[ProducerEntry], notices: &[NoticeDir]) -> ProducerRegistry<NoticeDir> {
    let mut registry = ProducerRegistry::new();

    if entries.is_empty() {
        let stems: BTreeSet<&str> = notices.iter().flat_map(NoticeDir::stems).collect();
        for stem in stems {
            registry.register(FileProducer::new(stem, format!("{stem}.json")));
        }
        return registry;
    }

    for entry in entries {
        let primary = entry.file_name();
        if entry.fallbacks.is_empty() {
            registry.register(FileProducer::new(&entry.name, primary));
            continue;
        }
        registry.register(fallback_chain(entry));
    }
    registry
}

/// Chain of file readers for one entry; each link is named after its file.
fn fallback_chain(entry: &ProducerEntry) -> FallbackProducer<NoticeDir> {
    let primary = entry.file_name();
    let chain = entry.fallbacks.iter().fold(
        FallbackProducer::new(&entry.name).or_else(FileProducer::new(&primary, &primary)),
        |chain, file| chain.or_else(FileProducer::new(file, file)),
    );
    debug!(producer = %entry.name, links = ?chain.links(), "fallback chain");
    chain
}
