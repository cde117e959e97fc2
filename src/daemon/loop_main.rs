//! Supervisor for `dsk monitor`: thread orchestration, reload and shutdown.
//!
//! Architecture: one process, plain threads, bounded crossbeam channels.
//! - **Maintenance threads** (`dsk-maint-<id>`): one per device with a free-space threshold
//! - **Report threads** (`dsk-report-<id>`): one per device unless its report count is zero
//! - **Retention thread** (`dsk-retention`): one for the whole network, when any rule limits episodes or age
//! - **Logger thread** (`dsk-logger`): JSONL + SQLite + console (via dual.rs)
//!
//! All workers of one generation share a [`StopToken`]. SIGHUP stops the
//! generation, waits for in-flight device calls and spawns a new one from the
//! reloaded configuration. A panicked worker is respawned up to 3 times in 5
//! minutes; past that the monitor shuts down.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded};
use rand::Rng;
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{DskError, Result};
use crate::core::settings::{CliOverrides, DeviceSettings, SettingsResolver};
use crate::core::units::duration_text;
use crate::daemon::signals::{SignalHandler, StopToken};
use crate::device::{Device, DeviceGateway};
use crate::logger::dual::{
    ActivityEvent, ActivityLoggerHandle, DualLoggerConfig, Verbosity, spawn_logger,
};
use crate::maintenance::gate::DeleteGate;
use crate::maintenance::remover::RecordingRemover;
use crate::maintenance::retention::RetentionSweeper;
use crate::maintenance::space::SpaceMaintainer;
use crate::report::{ReportScheduler, SpaceReport};

// ──────────────────── thread panic tracking ────────────────────

const MAX_RESPAWNS: u32 = 3;
const RESPAWN_WINDOW: Duration = Duration::from_secs(300);
const SUPERVISOR_TICK: Duration = Duration::from_millis(250);

/// Upper bound of the random delay before a device's first maintenance check.
const MAX_START_JITTER_MS: u64 = 3_000;

/// Bounded capacity for the worker→supervisor results channel.
const REPORT_CHANNEL_CAP: usize = 64;

struct ThreadHealth {
    panic_times: Vec<Instant>,
}

impl ThreadHealth {
    fn new() -> Self {
        Self {
            panic_times: Vec::new(),
        }
    }

    /// Record a panic. Returns false if the thread has exceeded the respawn limit.
    fn record_panic(&mut self) -> bool {
        let now = Instant::now();
        self.panic_times
            .retain(|t| now.duration_since(*t) < RESPAWN_WINDOW);
        self.panic_times.push(now);
        self.panic_times.len() <= MAX_RESPAWNS as usize
    }
}

// ──────────────────── worker reports ────────────────────

/// Message from a worker thread to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReport {
    CheckCompleted { device_id: String, deleted: bool },
    CheckFailed { device_id: String, code: &'static str },
    ReportSent { device_id: String, ok: bool },
    SweepCompleted { deleted: usize, failed: usize },
}

/// Running totals kept by the supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorCounters {
    pub checks: u64,
    pub deletions: u64,
    pub sweeps: u64,
    pub reports: u64,
    pub failures: u64,
}

impl MonitorCounters {
    fn record(&mut self, report: &WorkerReport) {
        match report {
            WorkerReport::CheckCompleted { deleted, .. } => {
                self.checks += 1;
                self.deletions += u64::from(*deleted);
            }
            WorkerReport::CheckFailed { .. } => {
                self.checks += 1;
                self.failures += 1;
            }
            WorkerReport::ReportSent { ok, .. } => {
                self.reports += 1;
                self.failures += u64::from(!*ok);
            }
            WorkerReport::SweepCompleted { deleted, failed } => {
                self.sweeps += 1;
                self.deletions += *deleted as u64;
                self.failures += *failed as u64;
            }
        }
    }
}

// ──────────────────── monitor configuration ────────────────────

/// Arguments for `dsk monitor`.
#[derive(Debug, Clone, Default)]
pub struct MonitorArgs {
    /// Explicit config file; reloads re-read the same source.
    pub config_path: Option<PathBuf>,
    /// Hosts from the command line; replace `devices.hosts` when non-empty.
    pub hosts: Vec<String>,
    pub overrides: CliOverrides,
    pub dry_run: bool,
    /// `None` disables the console echo.
    pub verbosity: Option<Verbosity>,
}

/// A reachable device with its resolved settings.
#[derive(Debug, Clone)]
pub struct PlannedDevice {
    pub host: String,
    pub device: Device,
    pub settings: DeviceSettings,
}

/// Everything one worker generation needs, resolved up front.
pub struct MonitorPlan {
    pub resolver: Arc<SettingsResolver>,
    pub devices: Vec<PlannedDevice>,
    pub retention_interval: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerKind {
    Maintenance(usize),
    Report(usize),
    Retention,
}

impl MonitorPlan {
    /// Describe every host and resolve its settings.
    ///
    /// Unreachable hosts are skipped with a warning. Settings conflicts are
    /// fatal, including a threshold larger than a device's capacity.
    pub fn resolve(
        config: Config,
        args: &MonitorArgs,
        gateway: &dyn DeviceGateway,
        logger: Option<&ActivityLoggerHandle>,
    ) -> Result<Self> {
        let hosts = if args.hosts.is_empty() {
            config.devices.hosts.clone()
        } else {
            args.hosts.clone()
        };
        if hosts.is_empty() {
            return Err(DskError::NoDevices {
                details: "no device hosts configured; pass --device or set devices.hosts"
                    .to_string(),
            });
        }

        let retention_interval = config
            .has_retention_rules()
            .then(|| Duration::from_secs(config.retention.interval_secs));
        let resolver = Arc::new(SettingsResolver::new(config, args.overrides.clone()));

        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(hosts.len());
        for host in hosts {
            let device = match gateway.describe(&host) {
                Ok(device) => device,
                Err(e) => {
                    if let Some(logger) = logger {
                        logger.send(ActivityEvent::Warning {
                            device_id: None,
                            message: format!("Skipping device at {host}: {e}"),
                        });
                    }
                    continue;
                }
            };
            if !seen.insert(device.id.clone()) {
                continue;
            }
            let settings = resolver.resolve_device(&device.id, &host)?;
            if settings.threshold.is_some()
                && let Ok(stats) = gateway.storage_stats(&device)
            {
                settings.min_free_bytes(&device.id, stats.total_bytes)?;
            }
            devices.push(PlannedDevice {
                host,
                device,
                settings,
            });
        }

        if devices.is_empty() {
            return Err(DskError::NoDevices {
                details: "none of the configured hosts answered".to_string(),
            });
        }
        Ok(Self {
            resolver,
            devices,
            retention_interval,
        })
    }

    fn worker_kinds(&self) -> Vec<WorkerKind> {
        let mut kinds = Vec::new();
        for (idx, planned) in self.devices.iter().enumerate() {
            if planned.settings.threshold.is_some() {
                kinds.push(WorkerKind::Maintenance(idx));
            }
            if planned.settings.reports_enabled() {
                kinds.push(WorkerKind::Report(idx));
            }
        }
        if self.retention_interval.is_some() {
            kinds.push(WorkerKind::Retention);
        }
        kinds
    }

    fn thread_name(&self, kind: WorkerKind) -> String {
        let device_id = |idx: usize| {
            self.devices
                .get(idx)
                .map_or("unknown", |planned| planned.device.id.as_str())
        };
        match kind {
            WorkerKind::Maintenance(idx) => format!("dsk-maint-{}", device_id(idx)),
            WorkerKind::Report(idx) => format!("dsk-report-{}", device_id(idx)),
            WorkerKind::Retention => "dsk-retention".to_string(),
        }
    }

    fn planned(&self, idx: usize) -> Result<&PlannedDevice> {
        self.devices.get(idx).ok_or_else(|| DskError::Runtime {
            details: format!("no planned device at index {idx}"),
        })
    }
}

struct Worker {
    kind: WorkerKind,
    handle: Option<thread::JoinHandle<()>>,
    health: ThreadHealth,
}

struct Generation {
    plan: MonitorPlan,
    stop: StopToken,
    workers: Vec<Worker>,
}

// ──────────────────── main daemon struct ────────────────────

/// The monitor: owns the logger, the delete gate and the worker generations.
pub struct MonitorDaemon {
    config: Config,
    args: MonitorArgs,
    gateway: Arc<dyn DeviceGateway>,
    gate: Arc<DeleteGate>,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signal_handler: SignalHandler,
    start_time: Instant,
    counters: MonitorCounters,
}

impl MonitorDaemon {
    /// Start the logger thread and register process signals.
    pub fn init(config: Config, args: MonitorArgs, gateway: Arc<dyn DeviceGateway>) -> Result<Self> {
        #[cfg(feature = "sqlite")]
        let sqlite_path = Some(config.paths.sqlite_db.clone());
        #[cfg(not(feature = "sqlite"))]
        let sqlite_path = None;

        let mut logger_config = DualLoggerConfig::new(config.paths.jsonl_log.clone(), sqlite_path);
        logger_config.console = args.verbosity;
        let (logger_handle, logger_join) = spawn_logger(logger_config)?;

        Ok(Self {
            config,
            args,
            gateway,
            gate: Arc::new(DeleteGate::new()),
            logger_handle,
            logger_join: Some(logger_join),
            signal_handler: SignalHandler::new(),
            start_time: Instant::now(),
            counters: MonitorCounters::default(),
        })
    }

    /// Replace the OS-wired signal flags, e.g. with [`SignalHandler::detached`].
    #[must_use]
    pub fn with_signal_handler(mut self, signal_handler: SignalHandler) -> Self {
        self.signal_handler = signal_handler;
        self
    }

    pub const fn counters(&self) -> MonitorCounters {
        self.counters
    }

    /// Run until shutdown is requested or every worker has finished.
    pub fn run(&mut self) -> Result<MonitorCounters> {
        let plan = match MonitorPlan::resolve(
            self.config.clone(),
            &self.args,
            self.gateway.as_ref(),
            Some(&self.logger_handle),
        ) {
            Ok(plan) => plan,
            Err(e) => {
                self.logger_handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("monitor start failed: {e}"),
                });
                self.stop_logger();
                return Err(e);
            }
        };

        self.logger_handle.send(ActivityEvent::MonitorStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.config.stable_hash().unwrap_or_default(),
            devices: plan.devices.len(),
            dry_run: self.args.dry_run,
        });
        self.announce(&plan);

        let (report_tx, report_rx) = bounded::<WorkerReport>(REPORT_CHANNEL_CAP);
        let mut generation = match self.spawn_generation(plan, &report_tx) {
            Ok(generation) => generation,
            Err(e) => {
                self.shutdown("worker spawn failed");
                return Err(e);
            }
        };

        // ──────── supervisor loop ────────
        let reason = loop {
            if self.signal_handler.should_shutdown() {
                eprintln!("[DSK-DAEMON] shutdown requested");
                break "shutdown requested";
            }

            if self.signal_handler.should_reload() {
                generation = match self.handle_config_reload(generation, &report_tx) {
                    Ok(next) => next,
                    Err(e) => {
                        self.logger_handle.send(ActivityEvent::Error {
                            code: e.code().to_string(),
                            message: format!("failed to start reloaded workers: {e}"),
                        });
                        self.shutdown("reload failed");
                        return Err(e);
                    }
                };
            }

            if self.signal_handler.should_report() {
                self.report_now(&generation.plan);
            }

            while let Ok(report) = report_rx.try_recv() {
                self.counters.record(&report);
            }

            if let Err(e) = self.check_workers(&mut generation, &report_tx) {
                self.logger_handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
                break "worker failure";
            }

            if generation.workers.is_empty() {
                break "all workers finished";
            }

            thread::sleep(SUPERVISOR_TICK);
        };

        stop_generation(generation);
        while let Ok(report) = report_rx.try_recv() {
            self.counters.record(&report);
        }
        self.shutdown(reason);
        Ok(self.counters)
    }

    // ──────────────────── helpers ────────────────────

    fn announce(&self, plan: &MonitorPlan) {
        for planned in &plan.devices {
            let tag = planned.device.tag();
            if planned.settings.reports_enabled() {
                let scheduler = ReportScheduler::new(
                    planned.device.clone(),
                    planned.settings.clone(),
                    Arc::clone(&self.gateway),
                    None,
                );
                self.notice(Some(&planned.device.id), scheduler.describe());
            }
            if let Some(threshold) = planned.settings.threshold {
                self.notice(
                    Some(&planned.device.id),
                    format!("{tag} Keeping at least {threshold} free"),
                );
            }
        }
        if let Some(interval) = plan.retention_interval {
            self.notice(
                None,
                format!(
                    "Retention rules will be applied every {}",
                    duration_text(interval.as_secs())
                ),
            );
        }
    }

    fn notice(&self, device_id: Option<&str>, message: String) {
        self.logger_handle.send(ActivityEvent::Notice {
            device_id: device_id.map(str::to_string),
            message,
        });
    }

    /// SIGUSR1: one report per device, outside the periodic schedule.
    fn report_now(&self, plan: &MonitorPlan) {
        for planned in &plan.devices {
            match SpaceReport::measure(self.gateway.as_ref(), &planned.device, &planned.settings) {
                Ok(report) => self.logger_handle.send(report.into_event()),
                Err(e) => self.logger_handle.send(ActivityEvent::Warning {
                    device_id: Some(planned.device.id.clone()),
                    message: format!("{} Space report failed: {e}", planned.device.tag()),
                }),
            }
        }
    }

    /// On any load or resolution failure the running generation is kept.
    fn handle_config_reload(
        &mut self,
        generation: Generation,
        report_tx: &Sender<WorkerReport>,
    ) -> Result<Generation> {
        eprintln!("[DSK-DAEMON] config reload requested (SIGHUP)");

        let new_config = match Config::load(self.args.config_path.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                self.reload_failed(&e);
                return Ok(generation);
            }
        };

        let old_hash = self.config.stable_hash().unwrap_or_default();
        let new_hash = new_config.stable_hash().unwrap_or_default();
        if old_hash == new_hash {
            eprintln!("[DSK-DAEMON] config unchanged, skipping reload");
            return Ok(generation);
        }

        let plan = match MonitorPlan::resolve(
            new_config.clone(),
            &self.args,
            self.gateway.as_ref(),
            Some(&self.logger_handle),
        ) {
            Ok(plan) => plan,
            Err(e) => {
                self.reload_failed(&e);
                return Ok(generation);
            }
        };

        stop_generation(generation);
        self.announce(&plan);
        let next = self.spawn_generation(plan, report_tx)?;
        self.logger_handle.send(ActivityEvent::ConfigReloaded {
            details: format!("config hash: {old_hash} -> {new_hash}"),
        });
        self.config = new_config;
        eprintln!("[DSK-DAEMON] config reloaded successfully");
        Ok(next)
    }

    fn reload_failed(&self, e: &DskError) {
        eprintln!("[DSK-DAEMON] config reload failed: {e}");
        self.logger_handle.send(ActivityEvent::Error {
            code: e.code().to_string(),
            message: format!("config reload failed, keeping previous settings: {e}"),
        });
    }

    /// Reap finished workers and respawn panicked ones.
    fn check_workers(
        &self,
        generation: &mut Generation,
        report_tx: &Sender<WorkerReport>,
    ) -> Result<()> {
        for idx in (0..generation.workers.len()).rev() {
            let finished = generation.workers[idx]
                .handle
                .as_ref()
                .is_some_and(thread::JoinHandle::is_finished);
            if !finished {
                continue;
            }

            let worker = &mut generation.workers[idx];
            let name = generation.plan.thread_name(worker.kind);
            let panicked = worker.handle.take().is_some_and(|h| h.join().is_err());
            if !panicked {
                generation.workers.remove(idx);
                continue;
            }

            eprintln!("[DSK-DAEMON] {name} thread panicked");
            if !worker.health.record_panic() {
                return Err(DskError::Runtime {
                    details: format!("{name} thread exceeded respawn limit"),
                });
            }
            eprintln!("[DSK-DAEMON] respawning {name}");
            worker.handle = Some(self.spawn_worker(
                &generation.plan,
                worker.kind,
                &generation.stop,
                report_tx,
            )?);
        }
        Ok(())
    }

    // ──────────────────── worker threads ────────────────────

    fn spawn_generation(
        &self,
        plan: MonitorPlan,
        report_tx: &Sender<WorkerReport>,
    ) -> Result<Generation> {
        let stop = StopToken::new();
        let mut workers = Vec::new();
        for kind in plan.worker_kinds() {
            match self.spawn_worker(&plan, kind, &stop, report_tx) {
                Ok(handle) => workers.push(Worker {
                    kind,
                    handle: Some(handle),
                    health: ThreadHealth::new(),
                }),
                Err(e) => {
                    stop_generation(Generation {
                        plan,
                        stop,
                        workers,
                    });
                    return Err(e);
                }
            }
        }
        Ok(Generation {
            plan,
            stop,
            workers,
        })
    }

    fn spawn_worker(
        &self,
        plan: &MonitorPlan,
        kind: WorkerKind,
        stop: &StopToken,
        report_tx: &Sender<WorkerReport>,
    ) -> Result<thread::JoinHandle<()>> {
        let name = plan.thread_name(kind);
        let stop = stop.clone();
        let report_tx = report_tx.clone();
        let logger = self.logger_handle.clone();
        let gateway = Arc::clone(&self.gateway);
        let remover = RecordingRemover::new(
            Arc::clone(&gateway),
            Arc::clone(&self.gate),
            Some(logger.clone()),
            self.args.dry_run,
        );
        let resolver = Arc::clone(&plan.resolver);

        let body: Box<dyn FnOnce() + Send> = match kind {
            WorkerKind::Maintenance(idx) => {
                let planned = plan.planned(idx)?.clone();
                Box::new(move || {
                    let device_id = planned.device.id.clone();
                    let mut maintainer = SpaceMaintainer::new(
                        planned.device,
                        planned.settings,
                        gateway,
                        resolver,
                        remover,
                        Some(logger),
                    );
                    maintainer.run(&stop, start_jitter(), |result| {
                        let report = match result {
                            Ok(outcome) => WorkerReport::CheckCompleted {
                                device_id: device_id.clone(),
                                deleted: outcome.deleted_recording.is_some(),
                            },
                            Err(e) => WorkerReport::CheckFailed {
                                device_id: device_id.clone(),
                                code: e.code(),
                            },
                        };
                        let _ = report_tx.try_send(report);
                    });
                })
            }
            WorkerKind::Report(idx) => {
                let planned = plan.planned(idx)?.clone();
                Box::new(move || {
                    let device_id = planned.device.id.clone();
                    let scheduler =
                        ReportScheduler::new(planned.device, planned.settings, gateway, Some(logger));
                    scheduler.run(&stop, |result| {
                        let _ = report_tx.try_send(WorkerReport::ReportSent {
                            device_id: device_id.clone(),
                            ok: result.is_ok(),
                        });
                    });
                })
            }
            WorkerKind::Retention => {
                let devices = plan.devices.iter().map(|p| p.device.clone()).collect();
                let interval = plan
                    .retention_interval
                    .unwrap_or(Duration::from_secs(crate::core::config::DEFAULT_RETENTION_INTERVAL_SECS));
                Box::new(move || {
                    let sweeper = RetentionSweeper::new(devices, gateway, resolver, remover, Some(logger));
                    sweeper.run(&stop, interval, |summary| {
                        let _ = report_tx.try_send(WorkerReport::SweepCompleted {
                            deleted: summary.deleted.len(),
                            failed: summary.failed + summary.unreachable.len(),
                        });
                    });
                })
            }
        };

        thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|source| DskError::Runtime {
                details: format!("failed to spawn {name} thread: {source}"),
            })
    }

    // ──────────────────── shutdown ────────────────────

    fn shutdown(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();
        self.logger_handle.send(ActivityEvent::MonitorStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        self.stop_logger();
        eprintln!("[DSK-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }

    fn stop_logger(&mut self) {
        self.logger_handle.shutdown();
        if let Some(logger_join) = self.logger_join.take() {
            let _ = logger_join.join();
        }
    }
}

/// Stop a generation and wait for its workers to finish their current call.
fn stop_generation(generation: Generation) {
    generation.stop.stop();
    for worker in generation.workers {
        if let Some(handle) = worker.handle {
            let _ = handle.join();
        }
    }
}

fn start_jitter() -> Duration {
    Duration::from_millis(rand::rng().random_range(0..=MAX_START_JITTER_MS))
}
