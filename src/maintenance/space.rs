//! Per-device free-space maintenance: measure, delete at most one recording,
//! schedule the next check from the remaining headroom.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::RecordingCatalog;
use crate::core::errors::{DskError, Result};
use crate::core::settings::{DeviceSettings, SettingsResolver};
use crate::daemon::signals::StopToken;
use crate::device::{Device, DeviceGateway, StorageStats};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, MaintenanceAction, MaintenanceEvent};
use crate::maintenance::remover::{DeleteReason, RecordingRemover};
use crate::policy::DeletePolicyEngine;
use crate::report::format_space_report;

/// Shortest delay between two checks of one device.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3);
/// Longest delay between two checks of one device.
pub const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(12 * 3_600);

/// Delay until the next check: whole seconds until the headroom above the
/// threshold could be consumed at `ingest_bytes_per_sec`, clamped to
/// [`MIN_CHECK_INTERVAL`, `MAX_CHECK_INTERVAL`].
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn adaptive_interval(free_bytes: u64, threshold_bytes: u64, ingest_bytes_per_sec: f64) -> Duration {
    let headroom = free_bytes.saturating_sub(threshold_bytes);
    if headroom == 0 || !ingest_bytes_per_sec.is_finite() || ingest_bytes_per_sec <= 0.0 {
        return if headroom == 0 {
            MIN_CHECK_INTERVAL
        } else {
            MAX_CHECK_INTERVAL
        };
    }
    let secs = (headroom as f64 / ingest_bytes_per_sec).floor();
    let secs = secs.min(MAX_CHECK_INTERVAL.as_secs() as f64) as u64;
    Duration::from_secs(secs).clamp(MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintainerState {
    Idle,
    Checking,
    Deleting,
    Scheduled(Duration),
}

/// Result of one `Checking` pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub action: MaintenanceAction,
    pub deleted_recording: Option<String>,
    /// Measured free bytes plus what this pass freed.
    pub free_bytes: u64,
    pub threshold_bytes: u64,
    pub next_check: Duration,
}

pub struct SpaceMaintainer {
    device: Device,
    settings: DeviceSettings,
    gateway: Arc<dyn DeviceGateway>,
    resolver: Arc<SettingsResolver>,
    engine: DeletePolicyEngine,
    remover: RecordingRemover,
    logger: Option<ActivityLoggerHandle>,
    clock: fn() -> i64,
    state: MaintainerState,
    last_stats: Option<StorageStats>,
}

impl SpaceMaintainer {
    pub fn new(
        device: Device,
        settings: DeviceSettings,
        gateway: Arc<dyn DeviceGateway>,
        resolver: Arc<SettingsResolver>,
        remover: RecordingRemover,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        let engine = DeletePolicyEngine::new(resolver.delete_policy(), resolver.watched_first());
        Self {
            device,
            settings,
            gateway,
            resolver,
            engine,
            remover,
            logger,
            clock: crate::core::units::unix_now,
            state: MaintainerState::Idle,
            last_stats: None,
        }
    }

    /// Replace the wall clock used for recording ages.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub const fn state(&self) -> MaintainerState {
        self.state
    }

    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Storage figures from the last successful pass, including the
    /// optimistic adjustment for a deletion it made.
    pub const fn last_stats(&self) -> Option<StorageStats> {
        self.last_stats
    }

    /// One `Checking` pass. Deletes at most one recording.
    pub fn check(&mut self) -> Result<PassOutcome> {
        self.state = MaintainerState::Checking;
        let result = self.check_inner();
        self.state = match &result {
            Ok(outcome) => MaintainerState::Scheduled(outcome.next_check),
            Err(_) => MaintainerState::Idle,
        };
        result
    }

    fn check_inner(&mut self) -> Result<PassOutcome> {
        let stats = self.gateway.storage_stats(&self.device)?;
        let threshold = self.settings.min_free_bytes(&self.device.id, stats.total_bytes)?;
        let mut free = stats.free_bytes;

        let (action, deleted_recording) = if free >= threshold {
            (MaintenanceAction::ThresholdOk, None)
        } else {
            self.log(ActivityEvent::SpaceReport {
                device_id: self.device.id.clone(),
                total_bytes: stats.total_bytes,
                free_bytes: stats.free_bytes,
                min_free_bytes: Some(threshold),
                message: format_space_report(&self.device, &stats, threshold),
            });
            self.state = MaintainerState::Deleting;
            match self.delete_one()? {
                Some((id, freed)) => {
                    free = free.saturating_add(freed).min(stats.total_bytes);
                    (MaintenanceAction::Checked, Some(id))
                }
                None => (MaintenanceAction::SkippedNoCandidate, None),
            }
        };

        self.last_stats = Some(StorageStats {
            total_bytes: stats.total_bytes,
            free_bytes: free,
        });
        let next_check = self.settings.check_interval.unwrap_or_else(|| {
            adaptive_interval(free, threshold, self.device.max_recording_bytes_per_sec())
        });

        let mut event = MaintenanceEvent::new(&self.device.id, &self.device.tag(), action);
        event.free_bytes = Some(free);
        event.threshold_bytes = Some(threshold);
        event.next_check_delay = Some(next_check);
        event.recording_id.clone_from(&deleted_recording);
        event.dry_run = self.remover.dry_run();
        self.log(ActivityEvent::Maintenance(event));

        Ok(PassOutcome {
            action,
            deleted_recording,
            free_bytes: free,
            threshold_bytes: threshold,
            next_check,
        })
    }

    /// Walk the ranked candidates until one deletion succeeds. Recordings that
    /// turn out to be active are skipped; a lost race ends the pass. `None`
    /// is reported by the caller's pass event.
    fn delete_one(&self) -> Result<Option<(String, u64)>> {
        let now = (self.clock)();
        let catalog = RecordingCatalog::fetch(self.gateway.as_ref(), &self.device, &self.resolver, now)?;
        let ranked = self.engine.rank(catalog.for_device(&self.device.id));

        for candidate in ranked {
            match self.remover.remove(&self.device, candidate, DeleteReason::FreeSpace) {
                Ok(receipt) => return Ok(Some((candidate.id().to_string(), receipt.freed_bytes))),
                Err(DskError::RecordingActive { .. }) => {}
                Err(e) if e.is_success_equivalent() => {
                    return Ok(Some((candidate.id().to_string(), 0)));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Check, sleep, repeat until `stop` fires. A failed pass is reported
    /// and retried after the previous delay.
    pub fn run(&mut self, stop: &StopToken, initial_delay: Duration, mut on_pass: impl FnMut(&Result<PassOutcome>)) {
        let mut delay = initial_delay;
        let mut retry_delay = self.settings.check_interval.unwrap_or(MIN_CHECK_INTERVAL);
        while stop.sleep(delay) {
            let result = self.check();
            match &result {
                Ok(outcome) => {
                    delay = outcome.next_check;
                    retry_delay = outcome.next_check;
                }
                Err(e) => {
                    self.log(ActivityEvent::Warning {
                        device_id: Some(self.device.id.clone()),
                        message: format!("{} Maintenance check failed: {e}", self.device.tag()),
                    });
                    delay = retry_delay;
                }
            }
            on_pass(&result);
        }
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}
