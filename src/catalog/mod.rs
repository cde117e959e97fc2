//! Immutable, annotated snapshot of the recordings on one or more devices.
//!
//! A catalog is rebuilt from gateway data at the top of every maintenance,
//! sweep or listing cycle. It is never mutated afterwards; deletions are
//! reflected by building the next snapshot.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::core::settings::{EffectiveSettings, SettingsResolver};
use crate::device::gateway::{ActiveStream, DeviceGateway, RawRecording, StreamActivity};
use crate::device::model::Device;

// ──────────────────── category ────────────────────

/// Fixed recording classification, in default delete order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    News,
    Series,
    Sport,
    Movie,
    Special,
}

impl Category {
    pub const ALL: [Self; 5] = [
        Self::News,
        Self::Series,
        Self::Sport,
        Self::Movie,
        Self::Special,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Series => "series",
            Self::Sport => "sport",
            Self::Movie => "movie",
            Self::Special => "special",
        }
    }

    /// Position in the built-in ordering; lower is deleted first.
    #[must_use]
    pub const fn default_delete_order(self) -> i32 {
        match self {
            Self::News => 0,
            Self::Series => 1,
            Self::Sport => 2,
            Self::Movie => 3,
            Self::Special => 4,
        }
    }

    /// Category of a device-reported string; anything unrecognized is `special`.
    #[must_use]
    pub fn from_device(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Special)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category {s:?}"))
    }
}

// ──────────────────── recording ────────────────────

/// A raw recording plus everything derived from settings and live device state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recording {
    pub device_id: String,
    pub raw: RawRecording,
    pub category: Category,
    pub settings: EffectiveSettings,
    pub watched: bool,
    pub playing: bool,
    pub recording: bool,
    /// Configured protection, or currently being played or recorded.
    pub protected: bool,
    /// Seconds since the scheduled start.
    pub age_secs: i64,
}

impl Recording {
    fn annotate(
        device_id: &str,
        raw: RawRecording,
        streams: &[ActiveStream],
        resolver: &SettingsResolver,
        now: i64,
    ) -> Self {
        let category = Category::from_device(&raw.category);
        let settings = resolver.resolve(category, &raw.series_id, &raw.title);
        let offset = i64::try_from(settings.watched_offset_secs).unwrap_or(i64::MAX);
        let watched = raw
            .remaining_unwatched_secs()
            .is_some_and(|remaining| remaining <= offset);
        let active = |activity| {
            streams
                .iter()
                .any(|stream| stream.activity == activity && stream.matches(&raw))
        };
        let playing = active(StreamActivity::Playback);
        let recording = active(StreamActivity::Record);
        Self {
            device_id: device_id.to_string(),
            category,
            watched,
            playing,
            recording,
            protected: settings.protected || playing || recording,
            age_secs: now - raw.start_time,
            settings,
            raw,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.raw.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.raw.title
    }

    #[must_use]
    pub const fn start_time(&self) -> i64 {
        self.raw.start_time
    }

    /// Series id, or the title for recordings without one.
    #[must_use]
    pub fn series_key(&self) -> &str {
        if self.raw.series_id.is_empty() {
            &self.raw.title
        } else {
            &self.raw.series_id
        }
    }

    /// What the device is doing with this recording right now, if anything.
    #[must_use]
    pub const fn activity(&self) -> Option<&'static str> {
        if self.recording {
            Some("recording")
        } else if self.playing {
            Some("playing")
        } else {
            None
        }
    }

    #[must_use]
    pub fn age_days(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        {
            self.age_secs as f64 / crate::core::units::DAY_SECONDS as f64
        }
    }
}

// ──────────────────── catalog ────────────────────

/// Space taken by one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesUsage {
    pub series: String,
    pub title: String,
    pub episodes: usize,
    pub bytes: u64,
    pub watched_bytes: u64,
}

/// Point-in-time recordings, possibly spanning several devices.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordingCatalog {
    recordings: Vec<Recording>,
}

impl RecordingCatalog {
    /// Annotate one device's raw listing.
    #[must_use]
    pub fn build(
        device: &Device,
        raw: Vec<RawRecording>,
        streams: &[ActiveStream],
        resolver: &SettingsResolver,
        now: i64,
    ) -> Self {
        let recordings = raw
            .into_iter()
            .map(|rec| Recording::annotate(&device.id, rec, streams, resolver, now))
            .collect();
        Self { recordings }
    }

    /// Fetch listing and live streams from the device, then annotate.
    pub fn fetch(
        gateway: &dyn DeviceGateway,
        device: &Device,
        resolver: &SettingsResolver,
        now: i64,
    ) -> Result<Self> {
        let raw = gateway.list_recordings(device)?;
        let streams = gateway.active_streams(device)?;
        Ok(Self::build(device, raw, &streams, resolver, now))
    }

    /// Combine per-device snapshots into one network-wide snapshot.
    #[must_use]
    pub fn merge(parts: impl IntoIterator<Item = Self>) -> Self {
        Self {
            recordings: parts
                .into_iter()
                .flat_map(|part| part.recordings)
                .collect(),
        }
    }

    #[must_use]
    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    pub fn for_device<'a>(&'a self, device_id: &'a str) -> impl Iterator<Item = &'a Recording> {
        self.recordings
            .iter()
            .filter(move |rec| rec.device_id == device_id)
    }

    /// Recordings grouped by series key, across all devices.
    #[must_use]
    pub fn by_series(&self) -> BTreeMap<&str, Vec<&Recording>> {
        let mut groups: BTreeMap<&str, Vec<&Recording>> = BTreeMap::new();
        for rec in &self.recordings {
            groups.entry(rec.series_key()).or_default().push(rec);
        }
        groups
    }

    /// Ask the device for the size of every recording on `device` that the
    /// listing left unsized. Returns how many sizes are still unknown.
    pub fn measure_sizes(&mut self, gateway: &dyn DeviceGateway, device: &Device) -> usize {
        let mut unknown = 0;
        for rec in self
            .recordings
            .iter_mut()
            .filter(|rec| rec.device_id == device.id && rec.raw.size_bytes.is_none())
        {
            match gateway.recording_size(device, &rec.raw) {
                Ok(size) => rec.raw.size_bytes = Some(size),
                Err(_) => unknown += 1,
            }
        }
        unknown
    }

    /// Episode count and known bytes for every series, by series key.
    #[must_use]
    pub fn series_usage(&self) -> Vec<SeriesUsage> {
        self.by_series()
            .into_iter()
            .map(|(key, episodes)| SeriesUsage {
                series: key.to_string(),
                title: episodes.first().map(|rec| rec.title().to_string()).unwrap_or_default(),
                episodes: episodes.len(),
                bytes: self.series_bytes(key),
                watched_bytes: self.watched_series_bytes(key),
            })
            .collect()
    }

    /// Known bytes used by a series.
    #[must_use]
    pub fn series_bytes(&self, series_key: &str) -> u64 {
        self.sum_series(series_key, |_| true)
    }

    /// Known bytes used by the watched episodes of a series.
    #[must_use]
    pub fn watched_series_bytes(&self, series_key: &str) -> u64 {
        self.sum_series(series_key, |rec| rec.watched)
    }

    fn sum_series(&self, series_key: &str, keep: impl Fn(&Recording) -> bool) -> u64 {
        self.recordings
            .iter()
            .filter(|rec| rec.series_key() == series_key && keep(rec))
            .filter_map(|rec| rec.raw.size_bytes)
            .sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::settings::CliOverrides;
    use crate::device::gateway::MAX_RESUME_OFFSET;
    use crate::device::StorageStats;
    use crate::device::mock::{MockGateway, mock_device};

    pub(crate) const NOW: i64 = 1_700_000_000;

    pub(crate) fn raw(id: &str, series: &str, category: &str, days_old: i64) -> RawRecording {
        let start = NOW - days_old * 86_400;
        RawRecording {
            id: id.to_string(),
            title: format!("{series} title"),
            series_id: series.to_string(),
            category: category.to_string(),
            filename: format!("{series} {id} 20231114 [20231114-2200].mpg"),
            start_time: start,
            end_time: start + 3_600,
            record_start_time: start,
            record_end_time: start + 3_600,
            size_bytes: Some(1_000),
            cmd_url: format!("http://dvr/recorded/cmd?id={id}"),
            play_url: format!("http://dvr/recorded/play?id={id}"),
            ..RawRecording::default()
        }
    }

    fn resolver(toml: &str) -> SettingsResolver {
        SettingsResolver::new(Config::from_toml(toml).expect("parse"), CliOverrides::default())
    }

    #[test]
    fn category_parsing_and_fallback() {
        assert_eq!("Sport".parse::<Category>(), Ok(Category::Sport));
        assert_eq!(Category::from_device("documentary"), Category::Special);
        assert_eq!(Category::from_device(""), Category::Special);
        assert_eq!(Category::News.default_delete_order(), 0);
    }

    #[test]
    fn watched_flag_honours_offset() {
        let device = mock_device("dvr", "HDVR-4US");
        let mut never = raw("a", "S1", "series", 1);
        never.resume = None;
        let mut near_end = raw("b", "S1", "series", 1);
        near_end.resume = Some(3_600 - 120);
        let mut midway = raw("c", "S1", "series", 1);
        midway.resume = Some(600);
        let mut finished = raw("d", "S1", "series", 1);
        finished.resume = Some(MAX_RESUME_OFFSET);

        let catalog = RecordingCatalog::build(
            &device,
            vec![never, near_end, midway, finished],
            &[],
            &resolver(""),
            NOW,
        );
        let watched: Vec<bool> = catalog.recordings().iter().map(|r| r.watched).collect();
        assert_eq!(watched, vec![false, true, false, true]);
    }

    #[test]
    fn active_streams_mark_protection() {
        let device = mock_device("dvr", "HDVR-4US");
        let rec = raw("a", "S1", "series", 1);
        let stream = ActiveStream {
            activity: StreamActivity::Record,
            name: "S1 a 20231114 [20231114-2200]".to_string(),
        };
        let catalog = RecordingCatalog::build(&device, vec![rec], &[stream], &resolver(""), NOW);
        let annotated = &catalog.recordings()[0];
        assert!(annotated.recording);
        assert!(!annotated.playing);
        assert!(annotated.protected);
        assert_eq!(annotated.activity(), Some("recording"));
    }

    #[test]
    fn configured_protection_and_age() {
        let device = mock_device("dvr", "HDVR-4US");
        let catalog = RecordingCatalog::build(
            &device,
            vec![raw("a", "S1", "sport", 3), raw("b", "S2", "news", 0)],
            &[],
            &resolver("[categories.sport]\nprotected = true\n"),
            NOW,
        );
        assert!(catalog.recordings()[0].protected);
        assert!(!catalog.recordings()[1].protected);
        assert_eq!(catalog.recordings()[0].age_secs, 3 * 86_400);
        assert!((catalog.recordings()[0].age_days() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_groups_series_across_devices() {
        let one = mock_device("dvr1", "HDVR-4US");
        let two = mock_device("dvr2", "HHDD-2TB");
        let res = resolver("");
        let mut watched = raw("c", "S1", "series", 1);
        watched.resume = Some(MAX_RESUME_OFFSET);
        let merged = RecordingCatalog::merge([
            RecordingCatalog::build(&one, vec![raw("a", "S1", "series", 3)], &[], &res, NOW),
            RecordingCatalog::build(
                &two,
                vec![raw("b", "S2", "movie", 2), watched],
                &[],
                &res,
                NOW,
            ),
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.for_device("dvr2").count(), 2);
        let series = merged.by_series();
        assert_eq!(series["S1"].len(), 2);
        assert_eq!(merged.series_bytes("S1"), 2_000);
        assert_eq!(merged.watched_series_bytes("S1"), 1_000);
        assert_eq!(merged.watched_series_bytes("S2"), 0);
    }

    #[test]
    fn measured_sizes_feed_series_usage() {
        let device = mock_device("dvr", "HDVR-4US");
        let mut unsized_a = raw("a", "S1", "series", 3);
        unsized_a.size_bytes = None;
        let mut unsized_b = raw("b", "S1", "series", 2);
        unsized_b.size_bytes = None;
        unsized_b.resume = Some(MAX_RESUME_OFFSET);
        let mut gw = MockGateway::new().with_device(
            device.clone(),
            StorageStats {
                total_bytes: 10_000,
                free_bytes: 5_000,
            },
        );
        for rec in [unsized_a.clone(), unsized_b.clone()] {
            let mut sized = rec;
            sized.size_bytes = Some(700);
            gw = gw.with_recording("dvr", sized);
        }
        let mut catalog =
            RecordingCatalog::build(&device, vec![unsized_a, unsized_b], &[], &resolver(""), NOW);
        assert_eq!(catalog.series_bytes("S1"), 0);

        assert_eq!(catalog.measure_sizes(&gw, &device), 0);
        assert_eq!(
            catalog.series_usage(),
            vec![SeriesUsage {
                series: "S1".to_string(),
                title: "S1 title".to_string(),
                episodes: 2,
                bytes: 1_400,
                watched_bytes: 700,
            }]
        );

        gw.fail_next("dvr", 5);
        let mut fresh = raw("c", "S2", "news", 1);
        fresh.size_bytes = None;
        let mut other = RecordingCatalog::build(&device, vec![fresh], &[], &resolver(""), NOW);
        assert_eq!(other.measure_sizes(&gw, &device), 1);
        assert_eq!(other.recordings()[0].raw.size_bytes, None);
    }

    #[test]
    fn series_key_falls_back_to_title() {
        let device = mock_device("dvr", "HDVR-4US");
        let mut rec = raw("a", "", "special", 1);
        rec.title = "One Off".to_string();
        let catalog = RecordingCatalog::build(&device, vec![rec], &[], &resolver(""), NOW);
        assert_eq!(catalog.recordings()[0].series_key(), "One Off");
    }
}
