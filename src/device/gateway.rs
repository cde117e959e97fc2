//! `DeviceGateway` trait and the raw records it exchanges.

#![allow(missing_docs)]

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::device::model::{Device, StorageStats};

/// `Resume` value the device writes once playback reached the end.
pub const MAX_RESUME_OFFSET: u32 = 0xFFFF_FFFF;

/// One recorded episode as reported by a device, before annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RawRecording {
    pub id: String,
    pub title: String,
    pub series_id: String,
    /// Category string as sent by the device; unknown values rank as `special`.
    pub category: String,
    pub episode_number: String,
    pub episode_title: String,
    pub filename: String,
    pub start_time: i64,
    pub end_time: i64,
    pub record_start_time: i64,
    pub record_end_time: i64,
    /// Playback position in seconds; `None` when never played.
    pub resume: Option<u32>,
    /// Known size, when the listing already carried it.
    pub size_bytes: Option<u64>,
    pub cmd_url: String,
    pub play_url: String,
}

impl RawRecording {
    /// Seconds actually captured.
    #[must_use]
    pub const fn recorded_secs(&self) -> i64 {
        let secs = self.record_end_time - self.record_start_time;
        if secs < 0 { 0 } else { secs }
    }

    /// Seconds left to watch, or `None` when playback never started.
    #[must_use]
    pub fn remaining_unwatched_secs(&self) -> Option<i64> {
        match self.resume {
            None | Some(0) => None,
            Some(MAX_RESUME_OFFSET) => Some(0),
            Some(resume) => Some((self.recorded_secs() - i64::from(resume)).max(0)),
        }
    }

    /// File name without directory or extension, used to match stream names.
    #[must_use]
    pub fn file_stem(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.filename)
    }
}

/// What a live stream on the device is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamActivity {
    Playback,
    Record,
}

/// A playback or record stream listed in the device status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStream {
    pub activity: StreamActivity,
    pub name: String,
}

impl ActiveStream {
    /// Whether this stream is playing or writing the given recording.
    #[must_use]
    pub fn matches(&self, recording: &RawRecording) -> bool {
        let name = alphanumeric(&self.name);
        !name.is_empty() && name == alphanumeric(recording.file_stem())
    }
}

fn alphanumeric(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Result of a delete request that reached the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    /// The device no longer knows the recording.
    AlreadyGone,
}

/// Access to a recording device's storage, catalog and delete operations.
///
/// Every call may block on the network and may fail with a transient error.
pub trait DeviceGateway: Send + Sync {
    /// Resolve a host name, IP address or URL into a device identity.
    fn describe(&self, host: &str) -> Result<Device>;

    fn storage_stats(&self, device: &Device) -> Result<StorageStats>;

    fn list_recordings(&self, device: &Device) -> Result<Vec<RawRecording>>;

    fn active_streams(&self, device: &Device) -> Result<Vec<ActiveStream>>;

    fn recording_size(&self, device: &Device, recording: &RawRecording) -> Result<u64>;

    /// Delete a recording; `rerecord` asks the device to allow capturing it again.
    fn delete_recording(
        &self,
        device: &Device,
        recording: &RawRecording,
        rerecord: bool,
    ) -> Result<DeleteOutcome>;

    /// Ask the device to re-evaluate the recording rules for a series.
    fn rearm_recording_rule(&self, device: &Device, series_id: &str) -> Result<()>;
}
