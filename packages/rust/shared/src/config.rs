//! Application configuration for noticemerge.
//!
//! User config lives at `~/.noticemerge/noticemerge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NoticeMergeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "noticemerge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".noticemerge";

// ---------------------------------------------------------------------------
// Config structs (matching noticemerge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Policy table source.
    #[serde(default)]
    pub policies: PoliciesConfig,

    /// Registered producers, in merge order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub producers: Vec<ProducerEntry>,
}

/// What to do when a field's existing and incoming values are incompatible
/// under its declared policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictMode {
    /// Leave the existing value unchanged and log the conflict.
    #[default]
    Keep,
    /// Downgrade to replace and log the conflict.
    Replace,
}

impl std::str::FromStr for ConflictMode {
    type Err = NoticeMergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep" => Ok(Self::Keep),
            "replace" => Ok(Self::Replace),
            other => Err(NoticeMergeError::config(format!(
                "unknown conflict mode '{other}': expected 'keep' or 'replace'"
            ))),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default output directory for written releases.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Maximum notices assembled concurrently.
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Conflict handling mode.
    #[serde(default)]
    pub on_conflict: ConflictMode,

    /// Pretty-print written JSON.
    #[serde(default = "default_true")]
    pub pretty: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            workers: default_workers(),
            on_conflict: ConflictMode::default(),
            pretty: true,
        }
    }
}

fn default_output_dir() -> String {
    "releases".into()
}
fn default_workers() -> u32 {
    4
}
fn default_true() -> bool {
    true
}

/// `[policies]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesConfig {
    /// Optional TOML policy table overlaid on (or replacing) the built-in one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Start from the built-in OCDS table before applying `table`.
    #[serde(default = "default_true")]
    pub use_builtin: bool,
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            table: None,
            use_builtin: true,
        }
    }
}

/// One `[[producers]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerEntry {
    /// Producer name used in diagnostics.
    pub name: String,
    /// Fragment file name inside a notice directory (defaults to `<name>.json`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Files tried in order when the primary one yields nothing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<String>,
}

impl ProducerEntry {
    /// Primary fragment file name.
    pub fn file_name(&self) -> String {
        self.file
            .clone()
            .unwrap_or_else(|| format!("{}.json", self.name))
    }
}

// ---------------------------------------------------------------------------
// Assembly config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime assembly configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct AssemblyConfig {
    /// Root directory for written releases.
    pub output_dir: PathBuf,
    /// Maximum notices assembled concurrently.
    pub workers: usize,
    /// Conflict handling mode.
    pub on_conflict: ConflictMode,
    /// Pretty-print written JSON.
    pub pretty: bool,
    /// Policy table file, if any.
    pub policy_table: Option<PathBuf>,
    /// Start from the built-in table.
    pub use_builtin_policies: bool,
}

impl From<&AppConfig> for AssemblyConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.defaults.output_dir),
            workers: config.defaults.workers.max(1) as usize,
            on_conflict: config.defaults.on_conflict,
            pretty: config.defaults.pretty,
            policy_table: config.policies.table.as_ref().map(PathBuf::from),
            use_builtin_policies: config.policies.use_builtin,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.noticemerge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NoticeMergeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.noticemerge/noticemerge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NoticeMergeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        NoticeMergeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| NoticeMergeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| NoticeMergeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NoticeMergeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
