//! Activity logger: one thread owns every sink, all other threads talk to it
//! through a bounded crossbeam channel.
//!
//! `send()` uses `try_send()`, so a full channel drops the event (and counts
//! it) instead of stalling a maintenance loop in the middle of a device call.
//! Sinks are the JSONL file, an optional console echo on stderr and, with the
//! `sqlite` feature, the deletion history database.

#![allow(missing_docs)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};

use crate::core::errors::{DskError, Result};
use crate::core::units::{byte_size, ctime, duration_text};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{HistoryRow, SqliteLogger};

const CHANNEL_CAPACITY: usize = 1024;

/// Events between recovery attempts of a degraded JSONL writer.
const JSONL_RECOVERY_EVERY: u64 = 256;

// ──────────────────── events ────────────────────

/// What a maintenance pass did on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceAction {
    /// Free space was measured and found below the threshold.
    Checked,
    Deleted,
    SkippedNoCandidate,
    ThresholdOk,
}

impl MaintenanceAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Checked => "checked",
            Self::Deleted => "deleted",
            Self::SkippedNoCandidate => "skipped-no-candidate",
            Self::ThresholdOk => "threshold-ok",
        }
    }
}

/// Structured record of one maintenance decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceEvent {
    pub device_id: String,
    /// Human label, e.g. `[HDHomeRun SCRIBE 1051ABCD]`.
    pub device_tag: String,
    pub action: MaintenanceAction,
    pub recording_id: Option<String>,
    pub title: Option<String>,
    /// Scheduled start of the recording, UNIX seconds.
    pub scheduled: Option<i64>,
    pub reason: Option<String>,
    pub next_check_delay: Option<Duration>,
    pub free_bytes: Option<u64>,
    pub threshold_bytes: Option<u64>,
    pub size_bytes: Option<u64>,
    pub rearmed: Option<bool>,
    pub dry_run: bool,
}

impl MaintenanceEvent {
    #[must_use]
    pub fn new(device_id: &str, device_tag: &str, action: MaintenanceAction) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_tag: device_tag.to_string(),
            action,
            recording_id: None,
            title: None,
            scheduled: None,
            reason: None,
            next_check_delay: None,
            free_bytes: None,
            threshold_bytes: None,
            size_bytes: None,
            rearmed: None,
            dry_run: false,
        }
    }

    /// The console line for this event and the severity it is shown at.
    #[must_use]
    pub fn console_line(&self) -> (Severity, String) {
        let tag = &self.device_tag;
        match self.action {
            MaintenanceAction::Deleted => {
                let title = self.title.as_deref().unwrap_or("?");
                let when = self.scheduled.map_or_else(|| "?".to_string(), ctime);
                let reason = self.reason.as_deref().unwrap_or("to free space");
                (
                    Severity::Info,
                    format!("{tag} Deleting \"{title}\" recorded {when} {reason}"),
                )
            }
            MaintenanceAction::SkippedNoCandidate => (
                Severity::Warning,
                format!("{tag} No deletable recordings found. Unable to free space."),
            ),
            MaintenanceAction::Checked | MaintenanceAction::ThresholdOk => {
                let mut line = format!("{tag} Free space");
                if let Some(free) = self.free_bytes {
                    line.push_str(&format!(" {}", byte_size(free)));
                }
                if let Some(threshold) = self.threshold_bytes {
                    line.push_str(&format!(" (minimum {})", byte_size(threshold)));
                }
                if let Some(delay) = self.next_check_delay {
                    line.push_str(&format!(
                        "; next maintenance cycle in {}",
                        duration_text(delay.as_secs())
                    ));
                }
                (Severity::Debug, line)
            }
        }
    }
}

/// Events accepted by the activity logger.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    MonitorStarted {
        version: String,
        config_hash: String,
        devices: usize,
        dry_run: bool,
    },
    MonitorStopped {
        reason: String,
        uptime_secs: u64,
    },
    ConfigReloaded {
        details: String,
    },
    Maintenance(MaintenanceEvent),
    SpaceReport {
        device_id: String,
        total_bytes: u64,
        free_bytes: u64,
        min_free_bytes: Option<u64>,
        /// Preformatted report line.
        message: String,
    },
    DeleteFailed {
        device_id: String,
        recording_id: String,
        title: String,
        error_code: String,
        /// Preformatted console line including the device tag.
        message: String,
    },
    /// Informational line, e.g. the report schedule of a device.
    Notice {
        device_id: Option<String>,
        message: String,
    },
    Warning {
        device_id: Option<String>,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

impl ActivityEvent {
    /// Console rendering, if the event has one.
    #[must_use]
    pub fn console_line(&self) -> Option<(Severity, String)> {
        match self {
            Self::MonitorStarted { devices, dry_run, .. } => {
                let mut line = format!("Monitoring {devices} device(s)");
                if *dry_run {
                    line.push_str(
                        ". This is a dry-run. No recordings will be deleted, even if log \
                         messages indicate that they are.",
                    );
                }
                Some((Severity::Info, line))
            }
            Self::MonitorStopped {
                reason,
                uptime_secs,
            } => Some((
                Severity::Info,
                format!("Stopped ({reason}) after {}", duration_text(*uptime_secs)),
            )),
            Self::ConfigReloaded { details } => {
                Some((Severity::Info, format!("Configuration reloaded: {details}")))
            }
            Self::Maintenance(event) => Some(event.console_line()),
            Self::SpaceReport { message, .. } | Self::Notice { message, .. } => {
                Some((Severity::Info, message.clone()))
            }
            Self::DeleteFailed { message, .. } | Self::Warning { message, .. } => {
                Some((Severity::Warning, message.clone()))
            }
            Self::Error { message, .. } => Some((Severity::Critical, message.clone())),
            Self::Shutdown => None,
        }
    }
}

// ──────────────────── handle ────────────────────

/// Cloneable sender side of the activity logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle whose events land on the returned receiver instead of a logger
    /// thread. Used by embedders that consume events themselves, and by tests.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Non-blocking. A full channel drops the event and bumps the counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the channel is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

/// How much of the event stream is echoed to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    #[default]
    Normal,
    /// Adds per-check headroom and scheduling lines.
    Verbose,
}

impl Verbosity {
    #[must_use]
    pub const fn shows(self, severity: Severity) -> bool {
        match self {
            Self::Quiet => matches!(severity, Severity::Warning | Severity::Critical),
            Self::Normal => !matches!(severity, Severity::Debug),
            Self::Verbose => true,
        }
    }
}

pub struct DualLoggerConfig {
    /// `None` disables the history database.
    pub sqlite_path: Option<PathBuf>,
    pub jsonl_config: JsonlConfig,
    /// `None` disables the console echo.
    pub console: Option<Verbosity>,
    pub channel_capacity: usize,
}

impl DualLoggerConfig {
    #[must_use]
    pub fn new(jsonl_path: PathBuf, sqlite_path: Option<PathBuf>) -> Self {
        Self {
            sqlite_path,
            jsonl_config: JsonlConfig::at(jsonl_path),
            console: Some(Verbosity::Normal),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the `dsk-logger` thread. It runs until `shutdown()` or until every
/// handle is dropped.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("dsk-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped))
        .map_err(|e| DskError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: DualLoggerConfig, dropped: &AtomicU64) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = config
        .sqlite_path
        .as_ref()
        .and_then(|path| match SqliteLogger::open(path) {
            Ok(db) => Some(db),
            Err(e) => {
                eprintln!("[DSK-DUAL] failed to open SQLite at {}: {e}", path.display());
                None
            }
        });
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    let mut jsonl = JsonlWriter::open(config.jsonl_config);
    let mut processed: u64 = 0;

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Warning, Severity::Warning);
            warn.details = Some(format!("{lost} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));

        if let Some(verbosity) = config.console {
            echo(verbosity, &event);
        }

        #[cfg(feature = "sqlite")]
        if let Some(row) = event_to_history_row(&event) {
            match sqlite.as_ref().map(|db| db.log_history(&row).is_ok()) {
                Some(true) => sqlite_failures = 0,
                Some(false) => {
                    sqlite_failures += 1;
                    if sqlite_failures >= 3 {
                        eprintln!(
                            "[DSK-DUAL] SQLite write failed {sqlite_failures} times, disabling"
                        );
                        sqlite = None;
                    }
                }
                None => {}
            }
        }

        processed += 1;
        if processed % JSONL_RECOVERY_EVERY == 0 {
            jsonl.try_recover();
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

fn echo(verbosity: Verbosity, event: &ActivityEvent) {
    let Some((severity, line)) = event.console_line() else {
        return;
    };
    if !verbosity.shows(severity) {
        return;
    }
    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let _ = writeln!(std::io::stderr(), "{stamp} {line}");
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::MonitorStarted {
            version,
            config_hash,
            devices,
            dry_run,
        } => {
            let mut e = LogEntry::new(EventType::MonitorStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} devices={devices}"
            ));
            e.dry_run = Some(*dry_run);
            e.ok = Some(true);
            e
        }
        ActivityEvent::MonitorStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::MonitorStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ConfigReloaded { details } => {
            let mut e = LogEntry::new(EventType::ConfigReload, Severity::Info);
            e.details = Some(details.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::Maintenance(m) => {
            let severity = match m.action {
                MaintenanceAction::SkippedNoCandidate => Severity::Warning,
                _ => Severity::Info,
            };
            let mut e = LogEntry::new(EventType::Maintenance, severity);
            e.device_id = Some(m.device_id.clone());
            e.action = Some(m.action.as_str().to_string());
            e.recording_id.clone_from(&m.recording_id);
            e.title.clone_from(&m.title);
            e.scheduled = m.scheduled;
            e.reason.clone_from(&m.reason);
            e.next_check_secs = m.next_check_delay.map(|d| d.as_secs());
            e.free_bytes = m.free_bytes;
            e.threshold_bytes = m.threshold_bytes;
            e.size = m.size_bytes;
            e.rearmed = m.rearmed;
            e.dry_run = Some(m.dry_run);
            e.ok = Some(m.action != MaintenanceAction::SkippedNoCandidate);
            e
        }
        ActivityEvent::SpaceReport {
            device_id,
            total_bytes,
            free_bytes,
            min_free_bytes,
            ..
        } => {
            let mut e = LogEntry::new(EventType::SpaceReport, Severity::Info);
            e.device_id = Some(device_id.clone());
            e.total_bytes = Some(*total_bytes);
            e.free_bytes = Some(*free_bytes);
            e.threshold_bytes = *min_free_bytes;
            e
        }
        ActivityEvent::DeleteFailed {
            device_id,
            recording_id,
            title,
            error_code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::DeleteFailed, Severity::Warning);
            e.device_id = Some(device_id.clone());
            e.recording_id = Some(recording_id.clone());
            e.title = Some(title.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Notice { device_id, message } => {
            let mut e = LogEntry::new(EventType::Notice, Severity::Info);
            e.device_id.clone_from(device_id);
            e.details = Some(message.clone());
            e
        }
        ActivityEvent::Warning { device_id, message } => {
            let mut e = LogEntry::new(EventType::Warning, Severity::Warning);
            e.device_id.clone_from(device_id);
            e.details = Some(message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        // Handled before conversion.
        ActivityEvent::Shutdown => LogEntry::new(EventType::MonitorStop, Severity::Info),
    }
}

#[cfg(feature = "sqlite")]
#[allow(clippy::cast_possible_wrap)]
fn event_to_history_row(event: &ActivityEvent) -> Option<HistoryRow> {
    let timestamp = crate::logger::jsonl::format_utc_now();
    match event {
        ActivityEvent::Maintenance(m)
            if matches!(
                m.action,
                MaintenanceAction::Deleted | MaintenanceAction::SkippedNoCandidate
            ) =>
        {
            let deleted = m.action == MaintenanceAction::Deleted;
            Some(HistoryRow {
                timestamp,
                event_type: "maintenance".to_string(),
                severity: if deleted { "info" } else { "warning" }.to_string(),
                device_id: Some(m.device_id.clone()),
                action: Some(m.action.as_str().to_string()),
                recording_id: m.recording_id.clone(),
                title: m.title.clone(),
                scheduled: m.scheduled,
                reason: m.reason.clone(),
                size_bytes: m.size_bytes.map(|s| s as i64),
                dry_run: i32::from(m.dry_run),
                success: i32::from(deleted),
                ..HistoryRow::default()
            })
        }
        ActivityEvent::DeleteFailed {
            device_id,
            recording_id,
            title,
            error_code,
            message,
        } => Some(HistoryRow {
            timestamp,
            event_type: "delete_failed".to_string(),
            severity: "warning".to_string(),
            device_id: Some(device_id.clone()),
            action: Some("deleted".to_string()),
            recording_id: Some(recording_id.clone()),
            title: Some(title.clone()),
            success: 0,
            error_code: Some(error_code.clone()),
            error_message: Some(message.clone()),
            ..HistoryRow::default()
        }),
        ActivityEvent::MonitorStarted {
            version, dry_run, ..
        } => Some(HistoryRow {
            timestamp,
            event_type: "monitor_start".to_string(),
            severity: "info".to_string(),
            dry_run: i32::from(*dry_run),
            success: 1,
            details: Some(format!("version={version}")),
            ..HistoryRow::default()
        }),
        ActivityEvent::MonitorStopped { reason, .. } => Some(HistoryRow {
            timestamp,
            event_type: "monitor_stop".to_string(),
            severity: "info".to_string(),
            success: 1,
            details: Some(reason.clone()),
            ..HistoryRow::default()
        }),
        ActivityEvent::Error { code, message } => Some(HistoryRow {
            timestamp,
            event_type: "error".to_string(),
            severity: "critical".to_string(),
            success: 0,
            error_code: Some(code.clone()),
            error_message: Some(message.clone()),
            ..HistoryRow::default()
        }),
        _ => None,
    }
}
