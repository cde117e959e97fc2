//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use dvr_space_keeper::catalog::{RecordingCatalog, SeriesUsage};
use dvr_space_keeper::core::config::Config;
use dvr_space_keeper::core::errors::DskError;
use dvr_space_keeper::core::settings::{CliOverrides, SettingsResolver};
use dvr_space_keeper::core::units::{byte_size, ctime, unix_now};
use dvr_space_keeper::daemon::loop_main::{MonitorArgs, MonitorDaemon};
use dvr_space_keeper::device::http::HttpGateway;
use dvr_space_keeper::device::{Device, DeviceGateway};
use dvr_space_keeper::logger::dual::Verbosity;
use dvr_space_keeper::logger::sqlite::{HistoryRow, SqliteLogger};
use dvr_space_keeper::policy::{DeletePolicy, DeletePolicyEngine};
use dvr_space_keeper::report::{ListedRecording, SpaceReport, format_recording_list, format_series_usage};

/// DVR space keeper: keeps network DVR storage from filling up.
#[derive(Debug, Parser)]
#[command(
    name = "dsk",
    author,
    version,
    about = "Free-space monitor and retention engine for HDHomeRun DVRs",
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
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (warnings and errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Monitor free space, enforce retention and report utilization.
    Monitor(MonitorCmdArgs),
    /// List recordings in the order they would be deleted.
    List(ListArgs),
    /// Print one space report per device.
    Report(ReportArgs),
    /// Show recent deletions from the history database.
    History(HistoryArgs),
    /// Inspect the configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DeviceArgs {
    /// Device host name, IP address or URL (repeatable). Defaults to `devices.hosts`.
    #[arg(short = 'd', long = "device", value_name = "HOST")]
    devices: Vec<String>,
}

#[derive(Debug, Clone, Args, Default)]
struct OrderArgs {
    /// Delete order: `age` or `category`.
    #[arg(short = 's', long = "delete-policy", value_name = "POLICY")]
    delete_policy: Option<DeletePolicy>,
    /// Delete watched recordings before unwatched ones.
    #[arg(short = 'w', long)]
    watched_first: bool,
    /// Seconds before the end at which a partly played recording counts as watched.
    #[arg(short = 'o', long = "watched-offset", value_name = "SECS")]
    watched_offset: Option<u64>,
}

#[derive(Debug, Clone, Args, Default)]
#[command(group(ArgGroup::new("threshold").args(["gigabytes_free", "percent_free"])))]
struct ThresholdArgs {
    /// Keep at least this many gigabytes free.
    #[arg(short = 'g', long, value_name = "GB")]
    gigabytes_free: Option<f64>,
    /// Keep at least this percentage of the disk free.
    #[arg(short = 'p', long, value_name = "PCT")]
    percent_free: Option<f64>,
}

#[derive(Debug, Clone, Args, Default)]
struct MonitorCmdArgs {
    #[command(flatten)]
    devices: DeviceArgs,
    #[command(flatten)]
    threshold: ThresholdArgs,
    #[command(flatten)]
    order: OrderArgs,
    /// Seconds between space reports.
    #[arg(short = 'i', long = "interval", value_name = "SECS")]
    interval: Option<u64>,
    /// Stop reporting after this many reports (0 disables reporting).
    #[arg(short = 'c', long = "count", value_name = "N")]
    count: Option<u64>,
    /// Fixed seconds between maintenance checks instead of the adaptive interval.
    #[arg(long, value_name = "SECS")]
    check_interval: Option<u64>,
    /// Log what would be deleted without deleting anything.
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct ListArgs {
    #[command(flatten)]
    devices: DeviceArgs,
    #[command(flatten)]
    order: OrderArgs,
}

#[derive(Debug, Clone, Args, Default)]
struct ReportArgs {
    #[command(flatten)]
    devices: DeviceArgs,
    #[command(flatten)]
    threshold: ThresholdArgs,
}

#[derive(Debug, Clone, Args)]
struct HistoryArgs {
    /// Maximum number of rows.
    #[arg(long, default_value_t = 20, value_name = "N")]
    limit: u32,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the config file location.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration.
    Validate,
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
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Some devices succeeded, others failed.
    #[error("{0}")]
    Partial(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
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
            Self::Partial(_) => 3,
            Self::Internal(_) | Self::Json(_) => 4,
        }
    }
}

impl From<DskError> for CliError {
    fn from(e: DskError) -> Self {
        match e {
            DskError::InvalidConfig { .. }
            | DskError::MissingConfig { .. }
            | DskError::ConfigParse { .. }
            | DskError::ConfigurationConflict { .. } => Self::User(e.to_string()),
            DskError::Runtime { .. } | DskError::ChannelClosed { .. } => {
                Self::Internal(e.to_string())
            }
            _ => Self::Runtime(e.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Monitor(args) => run_monitor(cli, args),
        Command::List(args) => run_list(cli, args),
        Command::Report(args) => run_report(cli, args),
        Command::History(args) => run_history(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── shared helpers ────────────────────

fn verbosity(cli: &Cli) -> Verbosity {
    if cli.verbose {
        Verbosity::Verbose
    } else if cli.quiet {
        Verbosity::Quiet
    } else {
        Verbosity::Normal
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn hosts_for(args: &DeviceArgs, config: &Config) -> Result<Vec<String>, CliError> {
    let hosts = if args.devices.is_empty() {
        config.devices.hosts.clone()
    } else {
        args.devices.clone()
    };
    if hosts.is_empty() {
        return Err(CliError::User(format!(
            "no device hosts configured; pass --device or set devices.hosts in {}",
            config.paths.config_file.display()
        )));
    }
    Ok(hosts)
}

fn check_threshold(args: &ThresholdArgs) -> Result<(), CliError> {
    if let Some(gb) = args.gigabytes_free
        && gb <= 0.0
    {
        return Err(CliError::User(format!(
            "--gigabytes-free must be > 0 (got {gb})"
        )));
    }
    if let Some(pct) = args.percent_free
        && !(pct > 0.0 && pct <= 100.0)
    {
        return Err(CliError::User(format!(
            "--percent-free must be in (0, 100] (got {pct})"
        )));
    }
    Ok(())
}

fn overrides_from(order: Option<&OrderArgs>, threshold: Option<&ThresholdArgs>) -> CliOverrides {
    let mut overrides = CliOverrides::default();
    if let Some(order) = order {
        overrides.delete_policy = order.delete_policy;
        overrides.watched_first = order.watched_first.then_some(true);
        overrides.watched_offset_secs = order.watched_offset;
    }
    if let Some(threshold) = threshold {
        overrides.gigabytes_free = threshold.gigabytes_free;
        overrides.percent_free = threshold.percent_free;
    }
    overrides
}

fn http_gateway(config: &Config) -> Result<HttpGateway, CliError> {
    Ok(HttpGateway::new(Duration::from_secs(
        config.gateway.timeout_secs,
    ))?)
}

/// Describe every host; failures are returned next to the devices found.
fn describe_hosts(gateway: &dyn DeviceGateway, hosts: &[String]) -> (Vec<(String, Device)>, Vec<String>) {
    let mut found = Vec::new();
    let mut failures = Vec::new();
    for host in hosts {
        match gateway.describe(host) {
            Ok(device) => found.push((host.clone(), device)),
            Err(e) => failures.push(format!("{host}: {e}")),
        }
    }
    (found, failures)
}

fn finish_partial(command: &str, failures: &[String], succeeded: usize) -> Result<(), CliError> {
    if failures.is_empty() {
        return Ok(());
    }
    for failure in failures {
        eprintln!("{} {failure}", "warning:".yellow().bold());
    }
    let summary = format!("{command}: {} device(s) failed", failures.len());
    if succeeded == 0 {
        Err(CliError::Runtime(summary))
    } else {
        Err(CliError::Partial(summary))
    }
}

// ──────────────────── monitor ────────────────────

fn run_monitor(cli: &Cli, args: &MonitorCmdArgs) -> Result<(), CliError> {
    check_threshold(&args.threshold)?;
    for (flag, value) in [
        ("--interval", args.interval),
        ("--check-interval", args.check_interval),
    ] {
        if value == Some(0) {
            return Err(CliError::User(format!("{flag} must be > 0")));
        }
    }

    let config = load_config(cli)?;
    let mut overrides = overrides_from(Some(&args.order), Some(&args.threshold));
    overrides.report_interval_secs = args.interval;
    overrides.report_count = args.count;
    overrides.check_interval_secs = args.check_interval;

    let monitor_args = MonitorArgs {
        config_path: cli.config.clone(),
        hosts: args.devices.devices.clone(),
        overrides,
        dry_run: args.dry_run,
        verbosity: Some(verbosity(cli)),
    };
    let gateway: Arc<dyn DeviceGateway> = Arc::new(http_gateway(&config)?);
    let counters = MonitorDaemon::init(config, monitor_args, gateway)?.run()?;

    if output_mode(cli) == OutputMode::Json {
        write_json_line(&json!({
            "command": "monitor",
            "dry_run": args.dry_run,
            "counters": counters,
        }))?;
    }
    Ok(())
}

// ──────────────────── list ────────────────────

#[derive(Debug, Serialize)]
struct DeviceListing {
    device_id: String,
    tag: String,
    recordings: Vec<ListedRecording>,
    series: Vec<SeriesUsage>,
    /// Recordings whose size the device would not report.
    unknown_sizes: usize,
}

fn run_list(cli: &Cli, args: &ListArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let hosts = hosts_for(&args.devices, &config)?;
    let gateway = http_gateway(&config)?;
    let resolver = SettingsResolver::new(config, overrides_from(Some(&args.order), None));
    let engine = DeletePolicyEngine::new(resolver.delete_policy(), resolver.watched_first());
    let mode = output_mode(cli);

    let (devices, mut failures) = describe_hosts(&gateway, &hosts);
    let mut listings = Vec::new();
    let mut listed = 0;
    let now = unix_now();
    for (host, device) in &devices {
        let mut catalog = match RecordingCatalog::fetch(&gateway, device, &resolver, now) {
            Ok(catalog) => catalog,
            Err(e) => {
                failures.push(format!("{host}: {e}"));
                continue;
            }
        };
        let unknown_sizes = catalog.measure_sizes(&gateway, device);
        let series = catalog.series_usage();
        let ordered = engine.listing(catalog.recordings());
        listed += 1;
        match mode {
            OutputMode::Human => {
                print!("{}", format_recording_list(device, &ordered));
                if !series.is_empty() {
                    println!("Space by series:");
                    print!("{}", format_series_usage(&series));
                }
            }
            OutputMode::Json => {
                let mut rank = 0;
                let recordings = ordered
                    .iter()
                    .map(|rec| {
                        let position = (!rec.protected).then(|| {
                            rank += 1;
                            rank
                        });
                        ListedRecording::new(rec, position)
                    })
                    .collect();
                listings.push(DeviceListing {
                    device_id: device.id.clone(),
                    tag: device.tag(),
                    recordings,
                    series,
                    unknown_sizes,
                });
            }
        }
    }

    if mode == OutputMode::Json {
        write_json_line(&json!({
            "command": "list",
            "delete_policy": engine.policy().as_str(),
            "watched_first": engine.watched_first(),
            "devices": serde_json::to_value(&listings)?,
        }))?;
    }
    finish_partial("list", &failures, listed)
}

// ──────────────────── report ────────────────────

fn run_report(cli: &Cli, args: &ReportArgs) -> Result<(), CliError> {
    check_threshold(&args.threshold)?;
    let config = load_config(cli)?;
    let hosts = hosts_for(&args.devices, &config)?;
    let gateway = http_gateway(&config)?;
    let resolver = SettingsResolver::new(config, overrides_from(None, Some(&args.threshold)));
    let mode = output_mode(cli);

    let (devices, mut failures) = describe_hosts(&gateway, &hosts);
    let mut reports = Vec::new();
    for (host, device) in &devices {
        let measured = resolver
            .resolve_device(&device.id, host)
            .and_then(|settings| SpaceReport::measure(&gateway, device, &settings));
        match measured {
            Ok(report) => {
                if mode == OutputMode::Human {
                    println!("{}", report.message);
                }
                reports.push(report);
            }
            Err(e @ DskError::ConfigurationConflict { .. }) => return Err(e.into()),
            Err(e) => failures.push(format!("{host}: {e}")),
        }
    }

    if mode == OutputMode::Json {
        write_json_line(&json!({
            "command": "report",
            "reports": serde_json::to_value(&reports)?,
        }))?;
    }
    finish_partial("report", &failures, reports.len())
}

// ──────────────────── history ────────────────────

fn run_history(cli: &Cli, args: &HistoryArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let db = SqliteLogger::open_existing(&config.paths.sqlite_db).map_err(|e| {
        CliError::Runtime(format!(
            "no history at {}: {e} (run `dsk monitor` first)",
            config.paths.sqlite_db.display()
        ))
    })?;
    let rows = db.recent_history(args.limit)?;
    let since = (chrono::Utc::now() - chrono::Duration::hours(24))
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let deleted_24h = db.count_deletions_since(&since)?;
    let freed_24h = u64::try_from(db.bytes_freed_since(&since)?).unwrap_or(0);

    match output_mode(cli) {
        OutputMode::Human => {
            println!("{}", "Recent activity".bold());
            println!(
                "  Last 24 hours: {deleted_24h} recording(s) deleted, {} freed",
                byte_size(freed_24h)
            );
            if rows.is_empty() {
                println!("  (no history yet)");
            }
            for row in &rows {
                println!("  {}", history_line(row));
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "history",
                "deleted_last_24h": deleted_24h,
                "bytes_freed_last_24h": freed_24h,
                "rows": serde_json::to_value(&rows)?,
            }))?;
        }
    }
    Ok(())
}

fn history_line(row: &HistoryRow) -> String {
    let action = row.action.as_deref().unwrap_or(&row.event_type);
    let status = if row.success == 0 {
        "FAILED".red().to_string()
    } else if row.dry_run != 0 {
        "dry-run".yellow().to_string()
    } else {
        "ok".green().to_string()
    };
    let mut line = format!(
        "{}  {:<10} {:<20} {status}",
        row.timestamp,
        row.device_id.as_deref().unwrap_or("-"),
        action
    );
    if let Some(title) = &row.title {
        line.push_str(&format!("  \"{title}\""));
    }
    if let Some(scheduled) = row.scheduled {
        line.push_str(&format!(" recorded {}", ctime(scheduled)));
    }
    if let Some(reason) = &row.reason {
        line.push_str(&format!(" {reason}"));
    }
    if let Some(message) = &row.error_message {
        line.push_str(&format!(" ({message})"));
    }
    line
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
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let value = serde_json::to_value(&config)?;
                    let payload = json!({
                        "command": "config show",
                        "config": value,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                let warnings = config.warnings();

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("{}", "Configuration is valid.".green());
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                        for warning in &warnings {
                            println!("  {} {warning}", "warning:".yellow());
                        }
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                            "warnings": warnings,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("{} {e}", "Configuration is INVALID:".red().bold());
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DSK_OUTPUT_FORMAT").ok();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "dsk",
            "--config",
            "/tmp/dsk.toml",
            "--json",
            "--no-color",
            "-v",
            "report",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["dsk", "report", "--json", "--no-color", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_monitor_flags() {
        let cli = Cli::try_parse_from([
            "dsk", "monitor", "-d", "10.0.0.5", "-d", "dvr.local", "-i", "300", "-c", "4", "-p",
            "2.5", "-s", "category", "-w", "-o", "90", "--check-interval", "60", "-n",
        ])
        .expect("parse");
        let Command::Monitor(args) = cli.command else {
            panic!("expected monitor");
        };
        assert_eq!(args.devices.devices, vec!["10.0.0.5", "dvr.local"]);
        assert_eq!(args.interval, Some(300));
        assert_eq!(args.count, Some(4));
        assert_eq!(args.threshold.percent_free, Some(2.5));
        assert_eq!(args.order.delete_policy, Some(DeletePolicy::Category));
        assert!(args.order.watched_first);
        assert_eq!(args.order.watched_offset, Some(90));
        assert_eq!(args.check_interval, Some(60));
        assert!(args.dry_run);
    }

    #[test]
    fn thresholds_are_mutually_exclusive() {
        assert!(Cli::try_parse_from(["dsk", "monitor", "-g", "20", "-p", "2"]).is_err());
        assert!(Cli::try_parse_from(["dsk", "report", "-g", "20"]).is_ok());
    }

    #[test]
    fn rejects_unknown_delete_policy() {
        assert!(Cli::try_parse_from(["dsk", "list", "-s", "priority"]).is_err());
    }

    #[test]
    fn parses_remaining_subcommands() {
        let cases = [
            vec!["dsk", "list", "-w"],
            vec!["dsk", "history", "--limit", "5"],
            vec!["dsk", "config"],
            vec!["dsk", "config", "path"],
            vec!["dsk", "config", "show"],
            vec!["dsk", "config", "validate"],
        ];
        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["dsk", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn threshold_bounds_checked() {
        let bad_pct = ThresholdArgs {
            gigabytes_free: None,
            percent_free: Some(150.0),
        };
        assert!(matches!(check_threshold(&bad_pct), Err(CliError::User(_))));
        let bad_gb = ThresholdArgs {
            gigabytes_free: Some(0.0),
            percent_free: None,
        };
        assert!(check_threshold(&bad_gb).is_err());
        assert!(check_threshold(&ThresholdArgs::default()).is_ok());
    }

    #[test]
    fn exit_codes_follow_contract() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
        assert_eq!(CliError::Partial(String::new()).exit_code(), 3);
        assert_eq!(CliError::Internal(String::new()).exit_code(), 4);
        let conflict: CliError = DskError::ConfigurationConflict {
            scope: "devices".to_string(),
            details: "both".to_string(),
        }
        .into();
        assert_eq!(conflict.exit_code(), 1);
        let transient: CliError = DskError::transient("dvr", "timeout").into();
        assert_eq!(transient.exit_code(), 2);
    }

    #[test]
    fn overrides_only_set_given_flags() {
        let order = OrderArgs::default();
        let overrides = overrides_from(Some(&order), None);
        assert_eq!(overrides, CliOverrides::default());

        let order = OrderArgs {
            delete_policy: Some(DeletePolicy::Age),
            watched_first: true,
            watched_offset: Some(30),
        };
        let overrides = overrides_from(Some(&order), None);
        assert_eq!(overrides.watched_first, Some(true));
        assert_eq!(overrides.watched_offset_secs, Some(30));
    }
}
