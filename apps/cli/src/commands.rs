//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use noticemerge_core::{
    Assembly, AssemblyPipeline, AssemblyProgress, FragmentMerger, PolicyTable, assemble_all,
    check_release, write_assembly,
};
use noticemerge_shared::{
    AppConfig, AssemblyConfig, AssemblySummary, ConflictMode, ProducerOutcome, init_config,
    load_config,
};
use tracing::{error, info};

use crate::notice::{self, NoticeDir};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// noticemerge: assemble procurement notice fragments into releases.
#[derive(Parser)]
#[command(
    name = "noticemerge",
    version,
    about = "Merge per-producer notice fragments into one consolidated release per notice.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Assemble one release per notice directory.
    Assemble {
        /// Notice directories, each holding one `<producer>.json` fragment per producer.
        #[arg(required = true)]
        notices: Vec<PathBuf>,

        /// Output root for written releases (defaults to config `output_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Policy table TOML overlaid on the built-in table.
        #[arg(short, long)]
        policies: Option<PathBuf>,

        /// Conflict handling: keep or replace.
        #[arg(long)]
        on_conflict: Option<String>,

        /// Maximum notices assembled concurrently.
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Print releases to stdout instead of writing them.
        #[arg(long)]
        stdout: bool,
    },

    /// Check a written release for unresolvable or duplicate keys.
    Check {
        /// Path to a `release.json`.
        release: PathBuf,

        /// Policy table TOML overlaid on the built-in table.
        #[arg(short, long)]
        policies: Option<PathBuf>,
    },

    /// Policy table inspection.
    Policies {
        #[command(subcommand)]
        action: PoliciesAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Policy subcommands.
#[derive(Subcommand)]
pub(crate) enum PoliciesAction {
    /// Print the resolved policy table as TOML.
    Show {
        /// Policy table TOML overlaid on the built-in table.
        #[arg(short, long)]
        policies: Option<PathBuf>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so `--stdout`
/// output stays clean.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "noticemerge=info",
        1 => "noticemerge=debug",
        _ => "noticemerge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Assemble {
            notices,
            out,
            policies,
            on_conflict,
            jobs,
            stdout,
        } => {
            let overrides = Overrides {
                out,
                policies,
                on_conflict,
                jobs,
            };
            cmd_assemble(&notices, overrides, stdout).await
        }
        Command::Check { release, policies } => cmd_check(release, policies).await,
        Command::Policies { action } => match action {
            PoliciesAction::Show { policies } => cmd_policies_show(policies).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Configuration resolution
// ---------------------------------------------------------------------------

/// CLI flags that override config file values.
#[derive(Default)]
struct Overrides {
    out: Option<PathBuf>,
    policies: Option<PathBuf>,
    on_conflict: Option<String>,
    jobs: Option<usize>,
}

fn resolve_config(app: &AppConfig, overrides: Overrides) -> Result<AssemblyConfig> {
    let mut config = AssemblyConfig::from(app);
    if let Some(out) = overrides.out {
        config.output_dir = out;
    }
    if let Some(path) = overrides.policies {
        config.policy_table = Some(path);
    }
    if let Some(mode) = overrides.on_conflict {
        config.on_conflict = mode.parse::<ConflictMode>()?;
    }
    if let Some(jobs) = overrides.jobs {
        config.workers = jobs.max(1);
    }
    Ok(config)
}

/// Built-in table (unless disabled), overlaid with the configured file.
fn resolve_policy_table(config: &AssemblyConfig) -> Result<PolicyTable> {
    let mut table = if config.use_builtin_policies {
        PolicyTable::builtin()
    } else {
        PolicyTable::empty()
    };
    if let Some(path) = &config.policy_table {
        table.overlay(PolicyTable::load(path)?);
        table.validate()?;
        info!(path = %path.display(), collections = table.collections.len(), "policy table loaded");
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_assemble(dirs: &[PathBuf], overrides: Overrides, stdout: bool) -> Result<()> {
    let app = load_config()?;
    let config = resolve_config(&app, overrides)?;
    let table = Arc::new(resolve_policy_table(&config)?);

    // A notice that cannot be loaded aborts that notice only.
    let mut notices = Vec::with_capacity(dirs.len());
    let mut unloadable = 0usize;
    for dir in dirs {
        match NoticeDir::load(dir) {
            Ok(notice) => notices.push(notice),
            Err(e) => {
                error!(path = %dir.display(), error = %e, "skipping notice");
                unloadable += 1;
            }
        }
    }
    if notices.is_empty() {
        return Err(eyre!("none of the {} notice directories could be loaded", dirs.len()));
    }

    let producers = notice::build_registry(&app.producers, &notices);
    if producers.is_empty() {
        return Err(eyre!("no producers configured and no fragment files found"));
    }

    info!(
        notices = notices.len(),
        producers = ?producers.names(),
        on_conflict = ?config.on_conflict,
        workers = config.workers,
        "assembling notices"
    );

    let merger = FragmentMerger::new(table, config.on_conflict);
    let pipeline = Arc::new(AssemblyPipeline::new(merger, producers));
    let progress = CliProgress::new();
    let assemblies = assemble_all(pipeline, notices, config.workers, &progress).await?;

    if stdout {
        for assembly in &assemblies {
            println!("{}", assembly.release.to_json(config.pretty)?);
        }
    } else {
        println!();
        for assembly in &assemblies {
            let written = write_assembly(&config.output_dir, assembly, config.pretty)?;
            print_summary(assembly);
            println!(
                "    -> {} ({} bytes, sha256 {})",
                written.release_path.display(),
                written.size_bytes,
                &written.sha256[..12]
            );
        }
        println!();
    }

    if unloadable > 0 {
        return Err(eyre!("{unloadable} notice directories could not be loaded"));
    }
    Ok(())
}

fn print_summary(assembly: &Assembly) {
    let summary = &assembly.summary;
    println!(
        "  {}  created {}  touched {}  skipped {}  conflicts {}  ({} ms)",
        summary.notice_id,
        summary.created(),
        summary.touched(),
        summary.skipped(),
        summary.conflicts(),
        summary.elapsed_ms
    );
    for report in &summary.producers {
        if let ProducerOutcome::Failed { message } = &report.outcome {
            println!("    ! {} failed: {message}", report.name);
        }
        for skipped in &report.merge.skipped {
            println!(
                "    ~ {} skipped {}[{}]: {}",
                report.name, skipped.collection, skipped.index, skipped.reason
            );
        }
    }
}

async fn cmd_check(release: PathBuf, policies: Option<PathBuf>) -> Result<()> {
    let app = load_config()?;
    let config = resolve_config(
        &app,
        Overrides {
            policies,
            ..Overrides::default()
        },
    )?;
    let table = resolve_policy_table(&config)?;

    let check = check_release(&table, &release)?;
    println!(
        "  {}: {} collections, {} entities",
        release.display(),
        check.collections.len(),
        check.entities
    );
    if check.is_clean() {
        println!("  keys OK");
        return Ok(());
    }
    for violation in &check.violations {
        println!("  ! {violation}");
    }
    Err(eyre!("{} key violation(s) in {}", check.violations.len(), release.display()))
}

async fn cmd_policies_show(policies: Option<PathBuf>) -> Result<()> {
    let app = load_config()?;
    let config = resolve_config(
        &app,
        Overrides {
            policies,
            ..Overrides::default()
        },
    )?;
    let table = resolve_policy_table(&config)?;
    println!("{}", table.to_toml()?);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl AssemblyProgress for CliProgress {
    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message("assembling");
    }

    fn finished(&self, summary: &AssemblySummary, _completed: usize, _total: usize) {
        self.bar.inc(1);
        self.bar.set_message(summary.notice_id.clone());
    }

    fn done(&self, _total: usize) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_assemble() {
        let cli = Cli::try_parse_from([
            "noticemerge",
            "-v",
            "assemble",
            "notices/a",
            "notices/b",
            "--on-conflict",
            "replace",
            "--jobs",
            "2",
            "--stdout",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Assemble {
                notices,
                on_conflict,
                jobs,
                stdout,
                ..
            } => {
                assert_eq!(notices.len(), 2);
                assert_eq!(on_conflict.as_deref(), Some("replace"));
                assert_eq!(jobs, Some(2));
                assert!(stdout);
            }
            _ => panic!("expected assemble"),
        }
    }

    #[test]
    fn assemble_requires_a_notice() {
        assert!(Cli::try_parse_from(["noticemerge", "assemble"]).is_err());
    }

    #[test]
    fn overrides_win_over_config() {
        let app = AppConfig::default();
        let config = resolve_config(
            &app,
            Overrides {
                out: Some(PathBuf::from("out")),
                on_conflict: Some("replace".into()),
                jobs: Some(0),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.on_conflict, ConflictMode::Replace);
        assert_eq!(config.workers, 1);

        let bad = Overrides {
            on_conflict: Some("merge".into()),
            ..Overrides::default()
        };
        assert!(resolve_config(&app, bad).is_err());
    }

    #[test]
    fn policy_table_overlay_from_file() {
        let path = std::env::temp_dir().join(format!("nm-policies-{}.toml", uuid::Uuid::now_v7()));
        std::fs::write(
            &path,
            r#"
[[collections]]
path = "parties"
[collections.fields]
name = { policy = "replace" }

[[collections]]
path = "planning.milestones"
"#,
        )
        .unwrap();

        let mut config = AssemblyConfig::from(&AppConfig::default());
        config.policy_table = Some(path.clone());
        let table = resolve_policy_table(&config).unwrap();
        assert!(table.collection("planning.milestones").is_some());
        assert!(table.collection("tender.lots").is_some());

        config.use_builtin_policies = false;
        let table = resolve_policy_table(&config).unwrap();
        assert_eq!(table.collections.len(), 2);

        let _ = std::fs::remove_file(&path);
    }
}
