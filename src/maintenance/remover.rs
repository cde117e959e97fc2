//! Applies one deletion: claim, live activity check, delete, re-arm, report.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use crate::catalog::Recording;
use crate::core::errors::{DskError, Result};
use crate::core::units::ctime;
use crate::device::{DeleteOutcome, Device, DeviceGateway, StreamActivity};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, MaintenanceAction, MaintenanceEvent};
use crate::maintenance::gate::DeleteGate;

/// Why a recording is being deleted. `Display` yields the message suffix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeleteReason {
    FreeSpace,
    MaxAge { max_age_days: f64 },
    MaxEpisodes { count: usize, max: u32 },
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeSpace => f.write_str("to free space"),
            Self::MaxAge { max_age_days } => {
                write!(f, "because it's older than {max_age_days} days")
            }
            Self::MaxEpisodes { count, max } => write!(
                f,
                "because there are {count} recorded episodes (maximum is {max})"
            ),
        }
    }
}

/// What a successful (or simulated) deletion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalReceipt {
    /// Size of the recording, known or measured before the delete.
    pub size_bytes: u64,
    /// Bytes actually returned to the device; zero in dry-run mode.
    pub freed_bytes: u64,
    pub rearmed: bool,
    pub dry_run: bool,
}

#[derive(Clone)]
pub struct RecordingRemover {
    gateway: Arc<dyn DeviceGateway>,
    gate: Arc<DeleteGate>,
    logger: Option<ActivityLoggerHandle>,
    dry_run: bool,
}

impl RecordingRemover {
    pub fn new(
        gateway: Arc<dyn DeviceGateway>,
        gate: Arc<DeleteGate>,
        logger: Option<ActivityLoggerHandle>,
        dry_run: bool,
    ) -> Self {
        Self {
            gateway,
            gate,
            logger,
            dry_run,
        }
    }

    pub const fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Delete one recording.
    ///
    /// Errors: `DeleteRaceLost` when another worker holds or already deleted
    /// it, `RecordingActive` when the device is playing or writing it, and
    /// device errors from the delete call itself. Every outcome is reported.
    pub fn remove(
        &self,
        device: &Device,
        recording: &Recording,
        reason: DeleteReason,
    ) -> Result<RemovalReceipt> {
        let Some(claim) = self.gate.claim(&device.id, recording.id()) else {
            return Err(self.race_lost(device, recording));
        };

        let activity = match recording.activity() {
            Some(activity) => Some(activity),
            None => self.live_activity(device, recording)?,
        };
        if let Some(activity) = activity {
            self.report_failure(
                device,
                recording,
                "DSK-2103",
                format!(
                    "{} Failed to delete \"{}\" recorded {} because it's {activity} right now",
                    device.tag(),
                    recording.title(),
                    ctime(recording.start_time()),
                ),
            );
            return Err(DskError::RecordingActive {
                recording: recording.id().to_string(),
                activity,
            });
        }

        let size_bytes = match recording.raw.size_bytes {
            Some(size) => size,
            None => self
                .gateway
                .recording_size(device, &recording.raw)
                .unwrap_or(0),
        };
        let rearm = recording.settings.rerecord.should_rearm(recording.watched);

        let mut event = MaintenanceEvent::new(&device.id, &device.tag(), MaintenanceAction::Deleted);
        event.recording_id = Some(recording.id().to_string());
        event.title = Some(recording.title().to_string());
        event.scheduled = Some(recording.start_time());
        event.reason = Some(reason.to_string());
        event.size_bytes = Some(size_bytes);
        event.dry_run = self.dry_run;

        if self.dry_run {
            event.rearmed = Some(rearm);
            self.log(ActivityEvent::Maintenance(event));
            return Ok(RemovalReceipt {
                size_bytes,
                freed_bytes: 0,
                rearmed: rearm,
                dry_run: true,
            });
        }

        match self.gateway.delete_recording(device, &recording.raw, rearm) {
            Ok(DeleteOutcome::Deleted) => claim.commit(),
            Ok(DeleteOutcome::AlreadyGone) => {
                claim.commit();
                return Err(self.race_lost(device, recording));
            }
            Err(e) => {
                drop(claim);
                self.report_failure(
                    device,
                    recording,
                    e.code(),
                    format!(
                        "{} Failed to delete \"{}\" recorded {}: {e}",
                        device.tag(),
                        recording.title(),
                        ctime(recording.start_time()),
                    ),
                );
                return Err(e);
            }
        }

        let rearmed = rearm && self.rearm(device, recording);
        event.rearmed = Some(rearmed);
        self.log(ActivityEvent::Maintenance(event));

        Ok(RemovalReceipt {
            size_bytes,
            freed_bytes: size_bytes,
            rearmed,
            dry_run: false,
        })
    }

    // ──────────────────── internals ────────────────────

    fn live_activity(&self, device: &Device, recording: &Recording) -> Result<Option<&'static str>> {
        let streams = self.gateway.active_streams(device)?;
        Ok(streams
            .iter()
            .find(|stream| stream.matches(&recording.raw))
            .map(|stream| match stream.activity {
                StreamActivity::Record => "recording",
                StreamActivity::Playback => "playing",
            }))
    }

    /// Best effort; the deletion already happened.
    fn rearm(&self, device: &Device, recording: &Recording) -> bool {
        if recording.raw.series_id.is_empty() {
            return false;
        }
        match self
            .gateway
            .rearm_recording_rule(device, &recording.raw.series_id)
        {
            Ok(()) => true,
            Err(e) => {
                self.log(ActivityEvent::Warning {
                    device_id: Some(device.id.clone()),
                    message: format!(
                        "{} Deleted \"{}\" but could not re-arm its recording rule: {e}",
                        device.tag(),
                        recording.title()
                    ),
                });
                false
            }
        }
    }

    fn race_lost(&self, device: &Device, recording: &Recording) -> DskError {
        self.log(ActivityEvent::Warning {
            device_id: Some(device.id.clone()),
            message: format!(
                "{} \"{}\" recorded {} was already deleted",
                device.tag(),
                recording.title(),
                ctime(recording.start_time())
            ),
        });
        DskError::DeleteRaceLost {
            device: device.id.clone(),
            recording: recording.id().to_string(),
        }
    }

    fn report_failure(&self, device: &Device, recording: &Recording, code: &str, message: String) {
        self.log(ActivityEvent::DeleteFailed {
            device_id: device.id.clone(),
            recording_id: recording.id().to_string(),
            title: recording.title().to_string(),
            error_code: code.to_string(),
            message,
        });
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}
