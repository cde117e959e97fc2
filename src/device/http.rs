//! HTTP/JSON gateway over a recording device's web API.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_LENGTH;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::core::errors::{DskError, Result};
use crate::device::gateway::{
    ActiveStream, DeleteOutcome, DeviceGateway, RawRecording, StreamActivity,
};
use crate::device::model::{Device, StorageStats};

const DISCOVER_PATH: &str = "discover.json";
const STATUS_PATH: &str = "status.json";
const RULE_SYNC_PATH: &str = "recording_events.post?sync";

// ──────────────────── wire records ────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiscoverResponse {
    #[serde(default)]
    friendly_name: String,
    #[serde(default)]
    model_number: String,
    #[serde(rename = "DeviceID", default)]
    device_id: String,
    #[serde(rename = "StorageID", default)]
    storage_id: String,
    #[serde(rename = "StorageURL", default)]
    storage_url: String,
    #[serde(default)]
    total_space: Option<u64>,
    #[serde(default)]
    free_space: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SeriesEntry {
    #[serde(rename = "SeriesID", default)]
    series_id: String,
    #[serde(rename = "EpisodesURL")]
    episodes_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EpisodeEntry {
    #[serde(default)]
    title: String,
    #[serde(rename = "SeriesID", default)]
    series_id: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    episode_number: String,
    #[serde(default)]
    episode_title: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    start_time: i64,
    #[serde(default)]
    end_time: i64,
    #[serde(default)]
    record_start_time: i64,
    #[serde(default)]
    record_end_time: i64,
    #[serde(default)]
    resume: Option<u32>,
    #[serde(rename = "CmdURL", default)]
    cmd_url: String,
    #[serde(rename = "PlayURL", default)]
    play_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusEntry {
    #[serde(default)]
    resource: String,
    #[serde(default)]
    name: Option<String>,
}

impl EpisodeEntry {
    fn into_raw(self) -> RawRecording {
        let id = recording_id(&self.cmd_url).unwrap_or_else(|| self.filename.clone());
        RawRecording {
            id,
            title: self.title,
            series_id: self.series_id,
            category: self.category,
            episode_number: self.episode_number,
            episode_title: self.episode_title,
            filename: self.filename,
            start_time: self.start_time,
            end_time: self.end_time,
            record_start_time: self.record_start_time,
            record_end_time: self.record_end_time,
            resume: self.resume,
            size_bytes: None,
            cmd_url: self.cmd_url,
            play_url: self.play_url,
        }
    }
}

/// The `id=` query parameter of a command URL.
fn recording_id(cmd_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(cmd_url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
}

/// Normalize a host name, `host:port` or URL into a base URL without trailing slash.
#[must_use]
pub fn base_url_for(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

// ──────────────────── gateway ────────────────────

/// Blocking HTTP client for the device web API.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
}

impl HttpGateway {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DskError::Runtime {
                details: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    fn get_json<T: DeserializeOwned>(&self, device: &str, url: &str) -> Result<T> {
        let response = self.client.get(url).send()?;
        let response = check_status(device, "GET", url, response)?;
        response.json::<T>().map_err(|e| DskError::DeviceProtocol {
            device: device.to_string(),
            details: format!("GET {url}: {e}"),
        })
    }

    fn discover(&self, key: &str, base_url: &str) -> Result<DiscoverResponse> {
        self.get_json(key, &format!("{base_url}/{DISCOVER_PATH}"))
    }
}

fn check_status(device: &str, verb: &str, url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(DskError::transient(
            device,
            format!("{verb} {url} returned {status}"),
        ))
    }
}

impl DeviceGateway for HttpGateway {
    fn describe(&self, host: &str) -> Result<Device> {
        let base_url = base_url_for(host);
        let discover = self.discover(host, &base_url)?;
        if discover.storage_url.is_empty() {
            return Err(DskError::DeviceProtocol {
                device: host.to_string(),
                details: "discover.json carries no StorageURL; not a storage device".to_string(),
            });
        }
        let id = if discover.device_id.is_empty() {
            host.to_string()
        } else {
            discover.device_id
        };
        Ok(Device {
            id,
            key: host.to_string(),
            base_url,
            friendly_name: discover.friendly_name,
            model_number: discover.model_number,
            storage_id: discover.storage_id,
            storage_url: discover.storage_url,
        })
    }

    fn storage_stats(&self, device: &Device) -> Result<StorageStats> {
        let discover = self.discover(&device.id, &device.base_url)?;
        match (discover.total_space, discover.free_space) {
            (Some(total_bytes), Some(free_bytes)) => Ok(StorageStats {
                total_bytes,
                free_bytes,
            }),
            _ => Err(DskError::DeviceProtocol {
                device: device.id.clone(),
                details: "discover.json is missing TotalSpace/FreeSpace".to_string(),
            }),
        }
    }

    fn list_recordings(&self, device: &Device) -> Result<Vec<RawRecording>> {
        let series: Vec<SeriesEntry> = self.get_json(&device.id, &device.storage_url)?;
        let mut seen = HashSet::new();
        let mut recordings = Vec::new();
        for entry in series {
            if !seen.insert(entry.series_id.clone()) {
                continue;
            }
            let episodes: Vec<EpisodeEntry> = self.get_json(&device.id, &entry.episodes_url)?;
            recordings.extend(episodes.into_iter().map(EpisodeEntry::into_raw));
        }
        Ok(recordings)
    }

    fn active_streams(&self, device: &Device) -> Result<Vec<ActiveStream>> {
        let url = format!("{}/{STATUS_PATH}", device.base_url);
        let entries: Vec<StatusEntry> = self.get_json(&device.id, &url)?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let activity = match entry.resource.as_str() {
                    "playback" => StreamActivity::Playback,
                    "record" => StreamActivity::Record,
                    _ => return None,
                };
                entry.name.map(|name| ActiveStream { activity, name })
            })
            .collect())
    }

    fn recording_size(&self, device: &Device, recording: &RawRecording) -> Result<u64> {
        if let Some(size) = recording.size_bytes {
            return Ok(size);
        }
        let response = self.client.head(&recording.play_url).send()?;
        let response = check_status(&device.id, "HEAD", &recording.play_url, response)?;
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0))
    }

    fn delete_recording(
        &self,
        device: &Device,
        recording: &RawRecording,
        rerecord: bool,
    ) -> Result<DeleteOutcome> {
        let mut url = format!("{}&cmd=delete", recording.cmd_url);
        if rerecord {
            url.push_str("&rerecord=1");
        }
        let response = self.client.post(&url).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::AlreadyGone);
        }
        check_status(&device.id, "POST", &url, response)?;
        Ok(DeleteOutcome::Deleted)
    }

    fn rearm_recording_rule(&self, device: &Device, _series_id: &str) -> Result<()> {
        let url = format!("{}/{RULE_SYNC_PATH}", device.base_url);
        let response = self.client.post(&url).send()?;
        check_status(&device.id, "POST", &url, response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalization() {
        assert_eq!(base_url_for("192.168.1.104"), "http://192.168.1.104");
        assert_eq!(base_url_for("dvr.local:8080/"), "http://dvr.local:8080");
        assert_eq!(base_url_for("http://10.0.0.5/"), "http://10.0.0.5");
        assert_eq!(base_url_for("https://dvr"), "https://dvr");
    }

    #[test]
    fn recording_id_from_cmd_url() {
        assert_eq!(
            recording_id("http://192.168.1.104:80/recorded/cmd?id=a156f919").as_deref(),
            Some("a156f919")
        );
        assert_eq!(recording_id("http://192.168.1.104/recorded/cmd"), None);
        assert_eq!(recording_id("not a url"), None);
    }

    #[test]
    fn episode_without_cmd_id_falls_back_to_filename() {
        let entry: EpisodeEntry = serde_json::from_str(
            r#"{"Title":"Show","SeriesID":"C1","Filename":"Show 20200607 [20200607-2300].mpg","StartTime":1591570800}"#,
        )
        .expect("parse");
        let raw = entry.into_raw();
        assert_eq!(raw.id, "Show 20200607 [20200607-2300].mpg");
        assert_eq!(raw.resume, None);
        assert_eq!(raw.start_time, 1_591_570_800);
    }

    #[test]
    fn episode_parses_full_record() {
        let entry: EpisodeEntry = serde_json::from_str(
            r#"{
                "Category": "series",
                "EndTime": 1591574400,
                "EpisodeNumber": "S30E21",
                "RecordEndTime": 1591574430,
                "RecordStartTime": 1591570772,
                "Resume": 4294967295,
                "SeriesID": "C184249ENDJE6",
                "StartTime": 1591570800,
                "Title": "America's Funniest Home Videos",
                "Filename": "America's Funniest Home Videos S30E21 20200607 [20200607-2300].mpg",
                "PlayURL": "http://192.168.1.104:80/recorded/play?id=a156f919",
                "CmdURL": "http://192.168.1.104:80/recorded/cmd?id=a156f919"
            }"#,
        )
        .expect("parse");
        let raw = entry.into_raw();
        assert_eq!(raw.id, "a156f919");
        assert_eq!(raw.resume, Some(u32::MAX));
        assert_eq!(raw.episode_number, "S30E21");
        assert_eq!(raw.category, "series");
    }
}
