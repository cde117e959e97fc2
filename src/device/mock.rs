//! In-memory gateway with call accounting and fault injection.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::errors::{DskError, Result};
use crate::device::gateway::{ActiveStream, DeleteOutcome, DeviceGateway, RawRecording};
use crate::device::model::{Device, StorageStats};

/// A delete request observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCall {
    pub device_id: String,
    pub recording_id: String,
    pub rerecord: bool,
}

/// A re-arm request observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RearmCall {
    pub device_id: String,
    pub series_id: String,
}

#[derive(Debug, Clone)]
struct MockDevice {
    device: Device,
    stats: StorageStats,
    recordings: Vec<RawRecording>,
    streams: Vec<ActiveStream>,
    failures_remaining: u32,
}

#[derive(Debug, Default)]
struct MockState {
    devices: BTreeMap<String, MockDevice>,
    deletes: Vec<DeleteCall>,
    rearms: Vec<RearmCall>,
}

/// Deterministic `DeviceGateway` for tests and demos.
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

/// A device identity with sensible defaults for the given id and model.
#[must_use]
pub fn mock_device(id: &str, model_number: &str) -> Device {
    Device {
        id: id.to_string(),
        key: id.to_string(),
        base_url: format!("http://{id}.mock"),
        friendly_name: "HDHomeRun MOCK".to_string(),
        model_number: model_number.to_string(),
        storage_id: format!("{id}-storage"),
        storage_url: format!("http://{id}.mock/recorded_files.json"),
    }
}

impl MockGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_device(self, device: Device, stats: StorageStats) -> Self {
        self.state.lock().devices.insert(
            device.id.clone(),
            MockDevice {
                device,
                stats,
                recordings: Vec::new(),
                streams: Vec::new(),
                failures_remaining: 0,
            },
        );
        self
    }

    #[must_use]
    pub fn with_recording(self, device_id: &str, recording: RawRecording) -> Self {
        self.add_recording(device_id, recording);
        self
    }

    #[must_use]
    pub fn with_stream(self, device_id: &str, stream: ActiveStream) -> Self {
        self.add_stream(device_id, stream);
        self
    }

    /// Start a playback or capture after construction.
    pub fn add_stream(&self, device_id: &str, stream: ActiveStream) {
        if let Some(dev) = self.state.lock().devices.get_mut(device_id) {
            dev.streams.push(stream);
        }
    }

    pub fn add_recording(&self, device_id: &str, recording: RawRecording) {
        if let Some(dev) = self.state.lock().devices.get_mut(device_id) {
            dev.recordings.push(recording);
        }
    }

    /// Remove a recording behind the monitor's back.
    pub fn remove_recording(&self, device_id: &str, recording_id: &str) {
        if let Some(dev) = self.state.lock().devices.get_mut(device_id) {
            dev.recordings.retain(|rec| rec.id != recording_id);
        }
    }

    pub fn set_free_bytes(&self, device_id: &str, free_bytes: u64) {
        if let Some(dev) = self.state.lock().devices.get_mut(device_id) {
            dev.stats.free_bytes = free_bytes;
        }
    }

    /// The next `count` calls against the device fail with a transient error.
    pub fn fail_next(&self, device_id: &str, count: u32) {
        if let Some(dev) = self.state.lock().devices.get_mut(device_id) {
            dev.failures_remaining = count;
        }
    }

    #[must_use]
    pub fn delete_calls(&self) -> Vec<DeleteCall> {
        self.state.lock().deletes.clone()
    }

    #[must_use]
    pub fn rearm_calls(&self) -> Vec<RearmCall> {
        self.state.lock().rearms.clone()
    }

    #[must_use]
    pub fn recording_ids(&self, device_id: &str) -> Vec<String> {
        self.state
            .lock()
            .devices
            .get(device_id)
            .map(|dev| dev.recordings.iter().map(|rec| rec.id.clone()).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn free_bytes(&self, device_id: &str) -> Option<u64> {
        self.state
            .lock()
            .devices
            .get(device_id)
            .map(|dev| dev.stats.free_bytes)
    }

    fn with_live_device<T>(
        &self,
        device_id: &str,
        op: impl FnOnce(&mut MockDevice, &mut Vec<DeleteCall>, &mut Vec<RearmCall>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let dev = state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| DskError::transient(device_id, "unknown mock device"))?;
        if dev.failures_remaining > 0 {
            dev.failures_remaining -= 1;
            return Err(DskError::transient(device_id, "injected failure"));
        }
        op(dev, &mut state.deletes, &mut state.rearms)
    }
}

impl DeviceGateway for MockGateway {
    fn describe(&self, host: &str) -> Result<Device> {
        let state = self.state.lock();
        state
            .devices
            .values()
            .find(|dev| dev.device.id == host || dev.device.key == host)
            .map(|dev| dev.device.clone())
            .ok_or_else(|| DskError::transient(host, "no mock device at this address"))
    }

    fn storage_stats(&self, device: &Device) -> Result<StorageStats> {
        self.with_live_device(&device.id, |dev, _, _| Ok(dev.stats))
    }

    fn list_recordings(&self, device: &Device) -> Result<Vec<RawRecording>> {
        self.with_live_device(&device.id, |dev, _, _| Ok(dev.recordings.clone()))
    }

    fn active_streams(&self, device: &Device) -> Result<Vec<ActiveStream>> {
        self.with_live_device(&device.id, |dev, _, _| Ok(dev.streams.clone()))
    }

    fn recording_size(&self, device: &Device, recording: &RawRecording) -> Result<u64> {
        self.with_live_device(&device.id, |dev, _, _| {
            let stored = dev
                .recordings
                .iter()
                .find(|rec| rec.id == recording.id)
                .and_then(|rec| rec.size_bytes);
            Ok(recording.size_bytes.or(stored).unwrap_or(0))
        })
    }

    fn delete_recording(
        &self,
        device: &Device,
        recording: &RawRecording,
        rerecord: bool,
    ) -> Result<DeleteOutcome> {
        self.with_live_device(&device.id, |dev, deletes, _| {
            deletes.push(DeleteCall {
                device_id: device.id.clone(),
                recording_id: recording.id.clone(),
                rerecord,
            });
            let Some(pos) = dev.recordings.iter().position(|rec| rec.id == recording.id) else {
                return Ok(DeleteOutcome::AlreadyGone);
            };
            let removed = dev.recordings.remove(pos);
            dev.stats.free_bytes = dev
                .stats
                .free_bytes
                .saturating_add(removed.size_bytes.unwrap_or(0))
                .min(dev.stats.total_bytes);
            Ok(DeleteOutcome::Deleted)
        })
    }

    fn rearm_recording_rule(&self, device: &Device, series_id: &str) -> Result<()> {
        self.with_live_device(&device.id, |_, _, rearms| {
            rearms.push(RearmCall {
                device_id: device.id.clone(),
                series_id: series_id.to_string(),
            });
            Ok(())
        })
    }
}
