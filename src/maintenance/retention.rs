//! Age and episode-count retention across every monitored device.
//!
//! Series are grouped network-wide, so one series recorded on two devices is
//! limited as a whole. Devices that cannot be reached are skipped for the
//! sweep; the others are still processed.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{Recording, RecordingCatalog};
use crate::core::errors::{DskError, Result};
use crate::core::settings::SettingsResolver;
use crate::daemon::signals::StopToken;
use crate::device::{Device, DeviceGateway};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::maintenance::remover::{DeleteReason, RecordingRemover};
use crate::policy::{DeletePolicy, DeletePolicyEngine};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub series_checked: usize,
    /// `(device id, recording id)` of every deletion, simulated ones included.
    pub deleted: Vec<(String, String)>,
    pub failed: usize,
    /// Candidates skipped because the device was playing or writing them.
    pub skipped_active: usize,
    /// Devices whose catalog could not be fetched.
    pub unreachable: Vec<String>,
    /// The sweep stopped early because shutdown or reload was requested.
    pub interrupted: bool,
}

pub struct RetentionSweeper {
    devices: Vec<Device>,
    gateway: Arc<dyn DeviceGateway>,
    resolver: Arc<SettingsResolver>,
    remover: RecordingRemover,
    logger: Option<ActivityLoggerHandle>,
    clock: fn() -> i64,
}

impl RetentionSweeper {
    pub fn new(
        devices: Vec<Device>,
        gateway: Arc<dyn DeviceGateway>,
        resolver: Arc<SettingsResolver>,
        remover: RecordingRemover,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            devices,
            gateway,
            resolver,
            remover,
            logger,
            clock: crate::core::units::unix_now,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Fetch every device, then enforce `max_age_days` and `max_episodes`
    /// per series. `stop` is checked before every device call.
    pub fn sweep(&self, stop: &StopToken) -> SweepSummary {
        let now = (self.clock)();
        let mut summary = SweepSummary::default();
        let mut parts = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            if stop.is_stopped() {
                summary.interrupted = true;
                return summary;
            }
            match RecordingCatalog::fetch(self.gateway.as_ref(), device, &self.resolver, now) {
                Ok(catalog) => parts.push(catalog),
                Err(e) => {
                    self.log(ActivityEvent::Warning {
                        device_id: Some(device.id.clone()),
                        message: format!("{} Skipping retention sweep: {e}", device.tag()),
                    });
                    summary.unreachable.push(device.id.clone());
                }
            }
        }
        let catalog = RecordingCatalog::merge(parts);

        for episodes in catalog.by_series().into_values() {
            if summary.interrupted {
                break;
            }
            let eligible: Vec<&Recording> =
                episodes.into_iter().filter(|rec| !rec.protected).collect();
            let Some(first) = eligible.first() else {
                continue;
            };
            let rules = first.settings;
            if !rules.has_retention_limit() {
                continue;
            }
            summary.series_checked += 1;

            let mut remaining = eligible;
            if let Some(max_age_days) = rules.max_age_days {
                remaining =
                    self.enforce_max_age(stop, remaining, max_age_days, rules.min_age_days, &mut summary);
            }
            if let Some(max) = rules.max_episodes {
                self.enforce_max_episodes(stop, &remaining, max, rules.min_age_days, &mut summary);
            }
        }
        summary
    }

    /// Returns the episodes still present afterwards.
    fn enforce_max_age<'a>(
        &self,
        stop: &StopToken,
        episodes: Vec<&'a Recording>,
        max_age_days: f64,
        min_age_days: Option<f64>,
        summary: &mut SweepSummary,
    ) -> Vec<&'a Recording> {
        let mut kept = Vec::with_capacity(episodes.len());
        for rec in episodes {
            let expired = rec.age_days() > max_age_days && !too_young(rec, min_age_days);
            if expired && self.try_remove(stop, rec, DeleteReason::MaxAge { max_age_days }, summary) {
                continue;
            }
            kept.push(rec);
        }
        kept
    }

    fn enforce_max_episodes(
        &self,
        stop: &StopToken,
        episodes: &[&Recording],
        max: u32,
        min_age_days: Option<f64>,
        summary: &mut SweepSummary,
    ) {
        let limit = usize::try_from(max).unwrap_or(usize::MAX);
        let mut count = episodes.len();
        if count <= limit {
            return;
        }
        let engine = DeletePolicyEngine::new(DeletePolicy::Age, self.resolver.watched_first());
        for rec in engine.rank(episodes.iter().copied()) {
            if count <= limit || summary.interrupted {
                break;
            }
            if too_young(rec, min_age_days) {
                continue;
            }
            if self.try_remove(stop, rec, DeleteReason::MaxEpisodes { count, max }, summary) {
                count -= 1;
            }
        }
    }

    /// `true` when the recording is gone (or would be, in dry-run mode).
    fn try_remove(
        &self,
        stop: &StopToken,
        rec: &Recording,
        reason: DeleteReason,
        summary: &mut SweepSummary,
    ) -> bool {
        if stop.is_stopped() {
            summary.interrupted = true;
            return false;
        }
        let Some(device) = self.devices.iter().find(|d| d.id == rec.device_id) else {
            return false;
        };
        match self.remover.remove(device, rec, reason) {
            Ok(_) => {
                summary
                    .deleted
                    .push((rec.device_id.clone(), rec.id().to_string()));
                true
            }
            Err(e) if e.is_success_equivalent() => true,
            // Started playing or recording after the snapshot; not a failure.
            Err(DskError::RecordingActive { .. }) => {
                summary.skipped_active += 1;
                false
            }
            // Already reported by the remover; retried next sweep.
            Err(_) => {
                summary.failed += 1;
                false
            }
        }
    }

    /// Sweep immediately, then every `interval` until `stop` fires.
    pub fn run(&self, stop: &StopToken, interval: Duration, mut on_sweep: impl FnMut(&SweepSummary)) {
        while !stop.is_stopped() {
            let summary = self.sweep(stop);
            on_sweep(&summary);
            if !stop.sleep(interval) {
                return;
            }
        }
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

fn too_young(rec: &Recording, min_age_days: Option<f64>) -> bool {
    min_age_days.is_some_and(|min| rec.age_days() < min)
}

/// Resolve devices for a sweep from hosts, dropping unreachable ones.
pub fn describe_all(gateway: &dyn DeviceGateway, hosts: &[String]) -> Result<Vec<Device>> {
    let devices: Vec<Device> = hosts
        .iter()
        .filter_map(|host| gateway.describe(host).ok())
        .collect();
    if devices.is_empty() && !hosts.is_empty() {
        return Err(DskError::NoDevices {
            details: format!("none of {} host(s) answered", hosts.len()),
        });
    }
    Ok(devices)
}
