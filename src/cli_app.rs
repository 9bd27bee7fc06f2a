//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, SystemTime};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use artifact_lifecycle::artifacts::publisher::{LinkOutcome, Publication, Publisher};
use artifact_lifecycle::artifacts::reference::{ScratchEntry, download_url, scan_scratch_dir};
use artifact_lifecycle::artifacts::sweeper::{SweepReport, SweepRun, Sweeper};
use artifact_lifecycle::core::config::Config;
use artifact_lifecycle::core::errors::AlmError;
use artifact_lifecycle::daemon::loop_main::{ArtifactDaemon, DaemonArgs as LoopDaemonArgs};
use artifact_lifecycle::logger::dual::{ActivityLoggerHandle, DualLoggerConfig, spawn_logger};
use artifact_lifecycle::logger::jsonl::JsonlConfig;
#[cfg(feature = "sqlite")]
use artifact_lifecycle::logger::sqlite::SqliteLogger;

/// Artifact Lifecycle Manager: time-bounded download links for generated files.
#[derive(Debug, Parser)]
#[command(
    name = "alm",
    author,
    version,
    about = "Artifact Lifecycle Manager - publish generated files, sweep them after expiry",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the sweep scheduler until signalled.
    Daemon(DaemonArgs),
    /// Publish a file under the allowed root for download.
    Publish(PublishArgs),
    /// Run a single sweep now.
    Sweep(SweepArgs),
    /// List current references and their expiry.
    List,
    /// Show recent activity from the SQLite log.
    #[cfg(feature = "sqlite")]
    History(HistoryArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DaemonArgs {
    /// Seconds between scheduled sweeps (overrides `sweep.interval_secs`).
    #[arg(long, value_name = "SECONDS")]
    interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct PublishArgs {
    /// File to publish; must resolve under `artifacts.allowed_root`.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,
    /// Link name in the scratch directory (random when omitted).
    #[arg(value_name = "NAME")]
    name: Option<String>,
    /// Request origin (scheme + host) used to print the full download URL.
    #[arg(long, value_name = "URL")]
    origin: Option<String>,
}

#[derive(Debug, Clone, Args, Default)]
struct SweepArgs {
    /// Report what would be deleted without deleting anything.
    #[arg(long)]
    dry_run: bool,
}

#[cfg(feature = "sqlite")]
#[derive(Debug, Clone, Args)]
struct HistoryArgs {
    /// Maximum number of rows to show.
    #[arg(long, default_value_t = 20, value_name = "N")]
    limit: u32,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<AlmError> for CliError {
    fn from(err: AlmError) -> Self {
        let user_error = err.is_access_violation()
            || matches!(
                err,
                AlmError::InvalidConfig { .. }
                    | AlmError::MissingConfig { .. }
                    | AlmError::ConfigParse { .. }
            );
        if user_error {
            Self::User(err.to_string())
        } else {
            Self::Runtime(err.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Publish(args) => run_publish(cli, args),
        Command::Sweep(args) => run_sweep(cli, args),
        Command::List => run_list(cli),
        #[cfg(feature = "sqlite")]
        Command::History(args) => run_history(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

// ──────────────────── daemon ────────────────────

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let loop_args = LoopDaemonArgs {
        interval: args.interval_secs.map(Duration::from_secs),
    };
    let mut daemon = ArtifactDaemon::init(config, &loop_args)?;
    daemon.run()?;
    Ok(())
}

// ──────────────────── one-shot activity logging ────────────────────

/// Activity logger for a single CLI command. Flushed and joined on `finish`.
struct CommandLogger {
    handle: ActivityLoggerHandle,
    join: thread::JoinHandle<()>,
}

impl CommandLogger {
    fn start(config: &Config) -> Option<Self> {
        let logger_config = DualLoggerConfig {
            sqlite_path: Some(config.paths.sqlite_db.clone()),
            jsonl_config: JsonlConfig {
                path: config.paths.jsonl_log.clone(),
                ..JsonlConfig::default()
            },
            channel_capacity: 64,
        };
        match spawn_logger(logger_config) {
            Ok((handle, join)) => Some(Self { handle, join }),
            Err(e) => {
                eprintln!("[ALM-CLI] activity logging disabled: {e}");
                None
            }
        }
    }

    fn handle(logger: Option<&Self>) -> Option<ActivityLoggerHandle> {
        logger.map(|l| l.handle.clone())
    }

    fn finish(self) {
        self.handle.shutdown();
        let _ = self.join.join();
    }
}

// ──────────────────── publish ────────────────────

fn run_publish(cli: &Cli, args: &PublishArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let logger = CommandLogger::start(&config);
    let publisher = Publisher::new(&config.artifacts, CommandLogger::handle(logger.as_ref()));

    let result = match &args.name {
        Some(name) => publisher.publish(&args.source, name),
        None => publisher.publish_generated(&args.source),
    };
    if let Some(logger) = logger {
        logger.finish();
    }
    let publication = result?;

    let url = args.origin.as_deref().map(|origin| {
        download_url(origin, &config.artifacts.public_path, &publication.name)
    });
    let expires_at = expiry_rfc3339(chrono::Utc::now(), config.artifacts.ttl());

    match output_mode(cli) {
        OutputMode::Human => {
            print_publication_human(&publication, url.as_deref(), expires_at.as_deref());
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "publish",
                "publication": serde_json::to_value(&publication)?,
                "url": url,
                "expires_at": expires_at,
            });
            write_json_line(&payload)?;
        }
    }

    match publication.link_outcome {
        LinkOutcome::Created => Ok(()),
        LinkOutcome::Failed { message, .. } => Err(CliError::Partial(format!(
            "validated but link was not created: {message}"
        ))),
    }
}

fn print_publication_human(publication: &Publication, url: Option<&str>, expires_at: Option<&str>) {
    if publication.is_linked() {
        println!("{} {}", "Published".green().bold(), publication.name.bold());
    } else {
        println!(
            "{} {}",
            "Validated, link NOT created:".yellow().bold(),
            publication.name.bold()
        );
    }
    println!("  Link:    {}", publication.link.display());
    println!("  Target:  {}", publication.target.display());
    println!("  Path:    {}", publication.public_path);
    if let Some(url) = url {
        println!("  URL:     {url}");
    }
    match expires_at {
        Some(expires_at) => println!("  Expires: {expires_at} (approx.)"),
        None => println!("  Expires: never"),
    }
}

/// `None` when the TTL reaches past what a calendar date can hold.
fn expiry_rfc3339(now: chrono::DateTime<chrono::Utc>, ttl: Duration) -> Option<String> {
    let ttl = chrono::Duration::from_std(ttl).ok()?;
    let expiry = now.checked_add_signed(ttl)?;
    Some(expiry.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

// ──────────────────── sweep ────────────────────

fn run_sweep(cli: &Cli, args: &SweepArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let dry_run = args.dry_run || config.sweep.dry_run;
    let logger = CommandLogger::start(&config);
    let sweeper = Sweeper::from_config(&config, CommandLogger::handle(logger.as_ref()))
        .with_dry_run(dry_run);

    let result = sweeper.sweep();
    if let Some(logger) = logger {
        logger.finish();
    }

    let report = match result? {
        SweepRun::Completed(report) => report,
        SweepRun::AlreadyRunning => {
            return Err(CliError::Runtime("a sweep is already running".to_string()));
        }
    };

    match output_mode(cli) {
        OutputMode::Human => print_sweep_human(&report, &config),
        OutputMode::Json => {
            let payload = json!({
                "command": "sweep",
                "scratch_dir": config.artifacts.scratch_dir.to_string_lossy(),
                "ttl_seconds": config.artifacts.ttl_seconds,
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "{} entr{} could not be removed",
            report.errors.len(),
            if report.errors.len() == 1 { "y" } else { "ies" }
        )))
    }
}

fn print_sweep_human(report: &SweepReport, config: &Config) {
    let verb = if report.dry_run {
        "Would delete"
    } else {
        "Deleted"
    };
    println!(
        "{} {} expired reference(s) in {} (ttl={}s, {} ms)",
        verb.bold(),
        report.deleted_count(),
        config.artifacts.scratch_dir.display(),
        config.artifacts.ttl_seconds,
        report.duration_ms
    );
    for name in &report.deleted {
        println!("  - {name}");
    }
    println!("  Retained: {}", report.retained);
    for err in &report.errors {
        println!("  {} {}: {}", "FAILED".red().bold(), err.name, err.error);
    }
}

// ──────────────────── list ────────────────────

fn run_list(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let entries = scan_scratch_dir(&config.artifacts.scratch_dir)?;
    let ttl = config.artifacts.ttl();
    let now = SystemTime::now();

    match output_mode(cli) {
        OutputMode::Human => {
            if entries.is_empty() {
                println!(
                    "No references in {}.",
                    config.artifacts.scratch_dir.display()
                );
                return Ok(());
            }
            println!("{:<34} {:>9} {:>10}  TARGET", "NAME", "AGE", "EXPIRES IN");
            for entry in &entries {
                match entry {
                    ScratchEntry::Reference(reference) => {
                        let expires = if reference.is_expired(ttl, now) {
                            "expired".red().to_string()
                        } else {
                            format_duration(reference.remaining(ttl, now))
                        };
                        let target = reference
                            .target
                            .as_ref()
                            .map_or_else(|| "-".to_string(), |t| t.display().to_string());
                        println!(
                            "{:<34} {:>9} {:>10}  {}",
                            reference.name,
                            format_duration(reference.age(now)),
                            expires,
                            target
                        );
                    }
                    ScratchEntry::Unreadable { name, error, .. } => {
                        println!("{name:<34} {} {error}", "unreadable:".yellow());
                    }
                }
            }
        }
        OutputMode::Json => {
            let items: Vec<Value> = entries
                .iter()
                .map(|entry| match entry {
                    ScratchEntry::Reference(reference) => json!({
                        "name": reference.name,
                        "link": reference.link.to_string_lossy(),
                        "target": reference.target.as_ref().map(|t| t.to_string_lossy()),
                        "public_path": reference.public_path(&config.artifacts.public_path),
                        "age_secs": reference.age(now).as_secs(),
                        "expires_in_secs": reference.remaining(ttl, now).as_secs(),
                        "expired": reference.is_expired(ttl, now),
                    }),
                    ScratchEntry::Unreadable { name, error, .. } => json!({
                        "name": name,
                        "error": error.to_string(),
                    }),
                })
                .collect();
            let payload = json!({
                "command": "list",
                "scratch_dir": config.artifacts.scratch_dir.to_string_lossy(),
                "ttl_seconds": config.artifacts.ttl_seconds,
                "references": items,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── history ────────────────────

#[cfg(feature = "sqlite")]
fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let db_path = &config.paths.sqlite_db;
    let rows = if db_path.exists() {
        SqliteLogger::open(db_path)?.recent_activity(args.limit)?
    } else {
        Vec::new()
    };

    match output_mode(cli) {
        OutputMode::Human => {
            if rows.is_empty() {
                println!("No activity recorded in {}.", db_path.display());
                return Ok(());
            }
            for row in &rows {
                let status = if row.success == 0 {
                    "FAIL".red().bold()
                } else {
                    "ok".green()
                };
                let subject = row
                    .name
                    .as_deref()
                    .or(row.path.as_deref())
                    .unwrap_or("-");
                let mut line = format!(
                    "{} {:<22} {:<4} {subject}",
                    row.timestamp, row.event_type, status
                );
                if let Some(count) = row.item_count {
                    line.push_str(&format!(" count={count}"));
                }
                if let Some(message) = &row.error_message {
                    line.push_str(&format!(" ({message})"));
                }
                println!("{line}");
            }
        }
        OutputMode::Json => {
            let items: Vec<Value> = rows
                .iter()
                .map(|row| {
                    json!({
                        "timestamp": row.timestamp,
                        "event_type": row.event_type,
                        "severity": row.severity,
                        "name": row.name,
                        "path": row.path,
                        "target": row.target,
                        "count": row.item_count,
                        "names": row.names.as_deref().and_then(|n| serde_json::from_str::<Value>(n).ok()),
                        "duration_ms": row.duration_ms,
                        "success": row.success != 0,
                        "error_code": row.error_code,
                        "error_message": row.error_message,
                    })
                })
                .collect();
            let payload = json!({
                "command": "history",
                "db": db_path.to_string_lossy(),
                "rows": items,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = load_config(cli)?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                let scratch_ready = config.artifacts.scratch_dir.is_dir();

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                        if !scratch_ready {
                            println!(
                                "  {} scratch directory {} does not exist",
                                "WARNING:".yellow().bold(),
                                config.artifacts.scratch_dir.display()
                            );
                        }
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                            "scratch_dir_exists": scratch_ready,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error_code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── helpers ────────────────────

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("alm {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
                println!("sqlite: {}", cfg!(feature = "sqlite"));
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "alm",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                    "sqlite": cfg!(feature = "sqlite"),
                }
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("ALM_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
