//! notesync command-line tool.
//!
//! Pushes local markdown articles to the remote note service, pulls remote
//! edits back, and inspects per-article sync state, conflicts, and the
//! audit log.

mod conflicts;
mod status;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use notesync_core::config::AppConfig;
use notesync_core::errors::SyncError;
use notesync_core::models::SyncDirection;
use notesync_core::sync_engine::{OutcomeKind, SyncEngine, SyncOptions, SyncOutcome};

const DEFAULT_CONFIG: &str = "notesync.toml";
const EXIT_CONFLICTS: u8 = 2;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// notesync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "notesync",
    version,
    about = "Keep local markdown articles in sync with a remote note service"
)]
struct Cli {
    /// Path to the TOML configuration file. Relative paths inside it are
    /// resolved against its directory.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish the local article to the remote service.
    Push {
        slug: String,
        #[command(flatten)]
        flags: SyncFlags,
    },

    /// Bring remote edits into the local article.
    Pull {
        slug: String,
        #[command(flatten)]
        flags: SyncFlags,
    },

    /// Show the sync state of one article (offline).
    Status { slug: String },

    /// Report the state of every article.
    CheckAll {
        /// Only articles whose slug matches this glob.
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Create a new article bound to an existing remote document.
    New {
        /// Article title.
        title: String,

        /// Remote document id.
        #[arg(long)]
        id: String,

        /// Directory name; derived from the title when omitted.
        #[arg(long)]
        slug: Option<String>,
    },

    /// List conflict records of an article.
    Conflicts { slug: String },

    /// Mark the open conflicts of an article as resolved.
    Resolve {
        slug: String,

        /// Which side wins: local, remote, or merged.
        #[arg(long)]
        accept: String,
    },

    /// Show recent audit log entries.
    Log {
        /// Only entries for this article.
        slug: Option<String>,

        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Write a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,
    },

    /// Validate the configuration file.
    Validate,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct SyncFlags {
    /// Override the edit lock and skip conflict detection.
    #[arg(long)]
    force: bool,

    /// Show what would change without writing anything.
    #[arg(long)]
    dry_run: bool,
}

impl From<SyncFlags> for SyncOptions {
    fn from(flags: SyncFlags) -> Self {
        Self {
            force: flags.force,
            dry_run: flags.dry_run,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let Cli { config, verbose, command } = cli;
    let open = || open_engine(&config, verbose);

    match command {
        Commands::Init { output } => cmd_init(&output).map(|()| ExitCode::SUCCESS),
        Commands::Validate => cmd_validate(&config).map(|()| ExitCode::SUCCESS),
        Commands::Push { slug, flags } => {
            let (engine, _guard) = open()?;
            cmd_sync(&engine, SyncDirection::Push, &slug, flags.into()).await
        }
        Commands::Pull { slug, flags } => {
            let (engine, _guard) = open()?;
            cmd_sync(&engine, SyncDirection::Pull, &slug, flags.into()).await
        }
        Commands::Status { slug } => {
            let (engine, _guard) = open()?;
            status::run_status(&engine, &slug).map(|()| ExitCode::SUCCESS)
        }
        Commands::CheckAll { pattern } => {
            let (engine, _guard) = open()?;
            let attention = status::run_check_all(&engine, pattern.as_deref())?;
            Ok(if attention { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Commands::New { title, id, slug } => {
            let (engine, _guard) = open()?;
            cmd_new(&engine, &title, &id, slug.as_deref()).map(|()| ExitCode::SUCCESS)
        }
        Commands::Conflicts { slug } => {
            let (engine, _guard) = open()?;
            conflicts::run_list(&engine, &slug).map(|()| ExitCode::SUCCESS)
        }
        Commands::Resolve { slug, accept } => {
            let (engine, _guard) = open()?;
            conflicts::run_resolve(&engine, &slug, &accept).map(|()| ExitCode::SUCCESS)
        }
        Commands::Log { slug, limit } => {
            let (engine, _guard) = open()?;
            cmd_log(&engine, slug.as_deref(), limit).map(|()| ExitCode::SUCCESS)
        }
    }
}

/// Config, logging and engine for every command that touches the workspace.
/// The guard must outlive the command so buffered log lines are flushed.
fn open_engine(config_path: &Path, verbose: u8) -> Result<(SyncEngine, Option<WorkerGuard>)> {
    let config = load_config(config_path)?;
    let guard = init_logging(&config, verbose)?;
    let engine = SyncEngine::from_config(config).context("failed to initialize sync engine")?;
    Ok((engine, guard))
}

/// 2 for pending conflicts, 3 when local records no longer match the remote.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::ConflictsPending { .. }) => EXIT_CONFLICTS,
        Some(SyncError::CommitInconsistency { .. }) => 3,
        _ => 1,
    }
}

/// A dry run that found blocking conflicts fails the same way a real run would.
fn outcome_status(kind: OutcomeKind, pending_conflicts: usize) -> u8 {
    if kind == OutcomeKind::DryRun && pending_conflicts > 0 {
        EXIT_CONFLICTS
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Config & logging
// ---------------------------------------------------------------------------

/// Load the config file.
///
/// Without `--config`, `./notesync.toml` is tried first, then
/// `<user config dir>/notesync/notesync.toml`, then built-in defaults. A
/// missing explicit path is an error. Relative workspace paths resolve
/// against the directory of a project config and against the current
/// directory otherwise.
fn load_config(path: &Path) -> Result<AppConfig> {
    let (source, root) = if path.exists() || path != Path::new(DEFAULT_CONFIG) {
        let root = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        (Some(path.to_path_buf()), root)
    } else {
        (user_config_path().filter(|p| p.exists()), PathBuf::from("."))
    };

    let mut config = AppConfig::load_and_resolve(source.as_deref()).with_context(|| match &source {
        Some(file) => format!("failed to load configuration file {}", file.display()),
        None => "invalid default configuration".to_string(),
    })?;

    config.workspace = config.workspace.rooted_at(&root);
    Ok(config)
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("notesync").join(DEFAULT_CONFIG))
}

/// `RUST_LOG` wins, then `-v`, then the configured level. With a log file
/// configured, output goes there instead of stderr.
fn init_logging(config: &AppConfig, verbose: u8) -> Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 => config.workspace.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    match &config.workspace.log_file {
        Some(log_file) => {
            let dir = log_file.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let name = log_file
                .file_name()
                .context("log_file must name a file")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .init();
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_sync(
    engine: &SyncEngine,
    direction: SyncDirection,
    slug: &str,
    opts: SyncOptions,
) -> Result<ExitCode> {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        spinner.set_style(template.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(format!("{direction} {slug}..."));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = match direction {
        SyncDirection::Push => engine.push(slug, opts).await,
        SyncDirection::Pull => engine.pull(slug, opts).await,
    };
    spinner.finish_and_clear();

    let outcome = result?;
    debug!(slug, state = %outcome.state, "run finished");
    print_outcome(&outcome);
    Ok(ExitCode::from(outcome_status(outcome.kind, outcome.pending_conflicts)))
}

fn print_outcome(outcome: &SyncOutcome) {
    for warning in &outcome.warnings {
        println!("{}", style::warn(&warning.to_string()));
    }

    match outcome.kind {
        OutcomeKind::NoOp => {
            println!(
                "{}",
                style::success(&format!("{}: no changes to {}", outcome.slug, outcome.direction))
            );
        }
        OutcomeKind::DryRun => {
            println!(
                "{} {} {}",
                style::header("Dry run:"),
                style::direction(outcome.direction),
                outcome.slug
            );
            if outcome.pending_conflicts > 0 {
                println!(
                    "{}",
                    style::error(&format!(
                        "{} conflicting section(s) would block this run",
                        outcome.pending_conflicts
                    ))
                );
            } else if outcome.auto_merged {
                println!("{}", style::dim("both sides changed; changes would be merged"));
            }
            if let Some(preview) = &outcome.preview {
                println!();
                println!("{preview}");
            }
        }
        OutcomeKind::Committed => {
            println!(
                "{}",
                style::success(&format!(
                    "{} {} ({})",
                    outcome.slug,
                    style::direction(outcome.direction),
                    outcome.version
                ))
            );
            if outcome.auto_merged {
                println!("  {}", style::dim("changes from both sides were merged"));
            }
            if outcome.local_edits_pending_push {
                println!(
                    "{}",
                    style::warn(&format!(
                        "merged local edits are not on the remote yet; run 'notesync push {}'",
                        outcome.slug
                    ))
                );
            }
            if outcome.images_uploaded + outcome.images_downloaded > 0 {
                println!(
                    "  images: {} uploaded, {} downloaded",
                    outcome.images_uploaded, outcome.images_downloaded
                );
            }
            if let Some(rev) = &outcome.remote_revision {
                println!("  remote revision: {rev}");
            }
        }
    }
}

fn cmd_new(engine: &SyncEngine, title: &str, id: &str, slug: Option<&str>) -> Result<()> {
    let meta = engine
        .create_article(id, title, slug)
        .context("failed to create article")?;
    let files = engine.files(&meta.slug);
    println!("{}", style::success(&format!("Created {}", meta.slug)));
    println!("  {}", files.index_path().display());
    println!("  {}", files.meta_path().display());
    Ok(())
}

fn cmd_log(engine: &SyncEngine, slug: Option<&str>, limit: u32) -> Result<()> {
    let entries = engine
        .history(slug, limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    println!();
    println!("{}", style::header(&format!("Audit log (last {limit})")));
    println!();
    for entry in &entries {
        let timestamp = entry.created_at.get(..19).unwrap_or(&entry.created_at);
        let action = if entry.success {
            entry.action.clone()
        } else {
            style::error(&entry.action)
        };
        println!(
            "  {}  {:<16} {:<20} {}",
            style::dim(timestamp),
            action,
            truncate(&entry.slug, 20),
            truncate(&entry.details, 60),
        );
    }
    println!();
    println!("{} entries shown", entries.len());
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        let overwrite = Confirm::new()
            .with_prompt(format!("{} already exists. Overwrite?", output.display()))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !overwrite {
            println!("{}", style::warn("Init cancelled. Existing file was not modified."));
            return Ok(());
        }
    }

    std::fs::write(output, AppConfig::default_template()).context("failed to write config file")?;

    println!("{}", style::success(&format!("Configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Point [remote] base_url at your note service wrapper");
    println!("  2. Export the session cookie (NOTE_SESSION_COOKIE by default)");
    println!("  3. Create an article: notesync new \"My title\" --id <remote id>");
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All fields are valid");

    println!();
    println!("Configuration summary:");
    println!("  Articles dir   : {}", config.workspace.articles_dir.display());
    println!("  Images dir     : {}", config.workspace.images_dir.display());
    println!("  Database       : {}", config.workspace.database_path().display());
    println!("  Remote         : {}", config.remote.base_url);
    println!(
        "  Session cookie : {}",
        if config.remote.session_cookie.is_some() { "set" } else { "NOT SET" }
    );
    println!("  Lock TTL       : {} min", config.sync.lock_ttl_minutes);
    println!("  Editor         : {}", config.sync.editor_name());
    println!();
    println!("Configuration is valid.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_sync_flags() {
        let cli = Cli::try_parse_from(["notesync", "push", "hello", "--force", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Push { slug, flags } => {
                assert_eq!(slug, "hello");
                assert!(flags.force && flags.dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG));
    }

    #[test]
    fn test_cli_requires_remote_id_for_new() {
        assert!(Cli::try_parse_from(["notesync", "new", "Title"]).is_err());
        assert!(Cli::try_parse_from(["notesync", "new", "Title", "--id", "n1"]).is_ok());
    }

    #[test]
    fn test_project_config_roots_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notesync.toml");
        std::fs::write(&path, "[sync]\nlock_ttl_minutes = 5\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.sync.lock_ttl_minutes, 5);
        assert_eq!(config.workspace.articles_dir, dir.path().join("articles"));
        assert_eq!(config.workspace.database_path(), dir.path().join(".notesync/notesync.db"));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        assert!(load_config(Path::new("/nonexistent/notesync.toml")).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let err = anyhow::Error::new(SyncError::ConflictsPending {
            slug: "a".into(),
            sections: 1,
            artifact: PathBuf::from("a/index.CONFLICT.md"),
        });
        assert_eq!(exit_status(&err), 2);

        let err = anyhow::Error::new(SyncError::CommitInconsistency {
            slug: "a".into(),
            remote_revision: None,
            detail: "disk full".into(),
        })
        .context("push failed");
        assert_eq!(exit_status(&err), 3);

        let err = anyhow::anyhow!("other");
        assert_eq!(exit_status(&err), 1);
    }

    #[test]
    fn test_dry_run_with_conflicts_exits_like_a_blocked_run() {
        assert_eq!(outcome_status(OutcomeKind::DryRun, 2), 2);
        assert_eq!(outcome_status(OutcomeKind::DryRun, 0), 0);
        assert_eq!(outcome_status(OutcomeKind::Committed, 0), 0);
        assert_eq!(outcome_status(OutcomeKind::NoOp, 0), 0);
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
