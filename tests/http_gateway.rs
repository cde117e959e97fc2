//! HTTP gateway against a fake device web API.
//!
//! The gateway is blocking, so the mock server is driven from a dedicated
//! tokio runtime while the test thread makes the calls.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::runtime::Runtime;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dvr_space_keeper::catalog::RecordingCatalog;
use dvr_space_keeper::core::config::Config;
use dvr_space_keeper::core::errors::DskError;
use dvr_space_keeper::core::settings::{CliOverrides, SettingsResolver};
use dvr_space_keeper::core::units::unix_now;
use dvr_space_keeper::device::http::HttpGateway;
use dvr_space_keeper::device::{DeleteOutcome, DeviceGateway, StreamActivity};
use dvr_space_keeper::maintenance::{DeleteGate, RecordingRemover, SpaceMaintainer};

const DAY: i64 = 86_400;
const PLAYING_FILE: &str = "Show B S01E01 20240101 [20240101-2000].mpg";

struct FakeDevice {
    server: MockServer,
    rt: Runtime,
}

impl FakeDevice {
    fn start() -> Self {
        let rt = Runtime::new().expect("tokio runtime");
        let server = rt.block_on(MockServer::start());
        Self { server, rt }
    }

    fn uri(&self) -> String {
        self.server.uri()
    }

    fn mount(&self, mock: Mock) {
        self.rt.block_on(mock.mount(&self.server));
    }

    fn verify(&self) {
        self.rt.block_on(self.server.verify());
    }

    fn discover_body(&self, free_bytes: u64) -> Value {
        json!({
            "FriendlyName": "HDHomeRun SCRIBE QUATRO",
            "ModelNumber": "HDVR-4US-1TB",
            "DeviceID": "1051ABCD",
            "StorageID": "1051ABCD-8C6F-4B55-9A3D-2F7C2E8C1A10",
            "StorageURL": format!("{}/recorded_files.json", self.uri()),
            "TotalSpace": 1000,
            "FreeSpace": free_bytes,
        })
    }

    fn episode(&self, id: &str, series: &str, title: &str, filename: &str, start: i64) -> Value {
        json!({
            "Category": "series",
            "SeriesID": series,
            "Title": title,
            "EpisodeNumber": "S01E01",
            "Filename": filename,
            "StartTime": start,
            "EndTime": start + 3_600,
            "RecordStartTime": start - 30,
            "RecordEndTime": start + 3_630,
            "CmdURL": format!("{}/recorded/cmd?id={id}", self.uri()),
            "PlayURL": format!("{}/recorded/play?id={id}", self.uri()),
        })
    }

    /// Two series, one listed twice, and one recording currently playing.
    fn with_library(self, free_bytes: u64) -> Self {
        let now = unix_now();
        self.mount(
            Mock::given(method("GET"))
                .and(path("/discover.json"))
                .respond_with(ResponseTemplate::new(200).set_body_json(self.discover_body(free_bytes))),
        );
        let series = json!([
            {"SeriesID": "C1", "Title": "Show A", "EpisodesURL": format!("{}/episodes/C1", self.uri())},
            {"SeriesID": "C1", "Title": "Show A", "EpisodesURL": format!("{}/episodes/C1", self.uri())},
            {"SeriesID": "C2", "Title": "Show B", "EpisodesURL": format!("{}/episodes/C2", self.uri())},
        ]);
        self.mount(
            Mock::given(method("GET"))
                .and(path("/recorded_files.json"))
                .respond_with(ResponseTemplate::new(200).set_body_json(series)),
        );
        let c1 = json!([
            self.episode("aaa", "C1", "Show A", "Show A S01E01 20231201 [20231201-2000].mpg", now - 10 * DAY),
            self.episode("bbb", "C1", "Show A", "Show A S01E02 20231208 [20231208-2000].mpg", now - 3 * DAY),
        ]);
        self.mount(
            Mock::given(method("GET"))
                .and(path("/episodes/C1"))
                .respond_with(ResponseTemplate::new(200).set_body_json(c1)),
        );
        let c2 = json!([self.episode("ccc", "C2", "Show B", PLAYING_FILE, now - 20 * DAY)]);
        self.mount(
            Mock::given(method("GET"))
                .and(path("/episodes/C2"))
                .respond_with(ResponseTemplate::new(200).set_body_json(c2)),
        );
        let status = json!([
            {"Resource": "tuner0", "VctNumber": "5.1"},
            {"Resource": "playback", "Name": "Show B S01E01 20240101 [20240101-2000]"},
            {"Resource": "record"},
        ]);
        self.mount(
            Mock::given(method("GET"))
                .and(path("/status.json"))
                .respond_with(ResponseTemplate::new(200).set_body_json(status)),
        );
        self
    }
}

fn gateway() -> HttpGateway {
    HttpGateway::new(Duration::from_secs(5)).expect("http client")
}

#[test]
fn describe_reads_discover_document() {
    let fake = FakeDevice::start().with_library(400);
    let device = gateway().describe(&fake.uri()).expect("describe");

    assert_eq!(device.id, "1051ABCD");
    assert_eq!(device.key, fake.uri());
    assert_eq!(device.base_url, fake.uri());
    assert_eq!(device.friendly_name, "HDHomeRun SCRIBE QUATRO");
    assert_eq!(device.storage_url, format!("{}/recorded_files.json", fake.uri()));
    assert!(device.tag().starts_with("[HDHomeRun SCRIBE QUATRO 1051ABCD"));
}

#[test]
fn storage_stats_come_from_discover() {
    let fake = FakeDevice::start().with_library(400);
    let gw = gateway();
    let device = gw.describe(&fake.uri()).expect("describe");
    let stats = gw.storage_stats(&device).expect("stats");
    assert_eq!(stats.total_bytes, 1000);
    assert_eq!(stats.free_bytes, 400);
}

#[test]
fn tuner_without_storage_is_rejected() {
    let fake = FakeDevice::start();
    fake.mount(
        Mock::given(method("GET"))
            .and(path("/discover.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "FriendlyName": "HDHomeRun CONNECT",
                "ModelNumber": "HDHR5-2US",
                "DeviceID": "10A1B2C3",
            }))),
    );
    let err = gateway().describe(&fake.uri()).expect_err("no storage");
    assert!(matches!(err, DskError::DeviceProtocol { .. }), "{err:?}");
    assert_eq!(err.code(), "DSK-2002");
}

#[test]
fn server_errors_are_transient() {
    let fake = FakeDevice::start();
    fake.mount(
        Mock::given(method("GET"))
            .and(path("/discover.json"))
            .respond_with(ResponseTemplate::new(503)),
    );
    let err = gateway().describe(&fake.uri()).expect_err("503");
    assert!(matches!(err, DskError::TransientDevice { .. }), "{err:?}");
    assert!(err.is_retryable());
}

#[test]
fn garbage_body_is_a_protocol_error() {
    let fake = FakeDevice::start();
    fake.mount(
        Mock::given(method("GET"))
            .and(path("/discover.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>setup</html>")),
    );
    let err = gateway().describe(&fake.uri()).expect_err("html");
    assert!(matches!(err, DskError::DeviceProtocol { .. }), "{err:?}");
}

#[test]
fn unreachable_host_is_transient() {
    let gw = HttpGateway::new(Duration::from_secs(1)).expect("http client");
    let err = gw.describe("127.0.0.1:9").expect_err("closed port");
    assert!(matches!(err, DskError::TransientDevice { .. }), "{err:?}");
}

#[test]
fn listing_dedupes_series_and_parses_episodes() {
    let fake = FakeDevice::start().with_library(400);
    let gw = gateway();
    let device = gw.describe(&fake.uri()).expect("describe");
    let mut recordings = gw.list_recordings(&device).expect("list");
    recordings.sort_by(|a, b| a.id.cmp(&b.id));

    let ids: Vec<&str> = recordings.iter().map(|rec| rec.id.as_str()).collect();
    assert_eq!(ids, ["aaa", "bbb", "ccc"]);
    assert_eq!(recordings[0].series_id, "C1");
    assert_eq!(recordings[0].category, "series");
    assert_eq!(recordings[0].recorded_secs(), 3_660);
    assert_eq!(recordings[0].resume, None);
    assert_eq!(recordings[0].size_bytes, None);
    fake.verify();
}

#[test]
fn status_keeps_named_streams_only() {
    let fake = FakeDevice::start().with_library(400);
    let gw = gateway();
    let device = gw.describe(&fake.uri()).expect("describe");
    let streams = gw.active_streams(&device).expect("status");
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].activity, StreamActivity::Playback);
}

#[test]
fn catalog_marks_playing_recording() {
    let fake = FakeDevice::start().with_library(400);
    let gw = gateway();
    let device = gw.describe(&fake.uri()).expect("describe");
    let resolver = SettingsResolver::new(Config::default(), CliOverrides::default());
    let catalog = RecordingCatalog::fetch(&gw, &device, &resolver, unix_now()).expect("catalog");

    assert_eq!(catalog.len(), 3);
    let playing: Vec<&str> = catalog
        .recordings()
        .iter()
        .filter(|rec| rec.playing)
        .map(|rec| rec.id())
        .collect();
    assert_eq!(playing, ["ccc"]);
    assert!(catalog.recordings().iter().all(|rec| rec.device_id == "1051ABCD"));
}

#[test]
fn recording_size_uses_head_content_length() {
    let fake = FakeDevice::start().with_library(400);
    fake.mount(
        Mock::given(method("HEAD"))
            .and(path("/recorded/play"))
            .and(query_param("id", "aaa"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0_u8; 4096])),
    );
    let gw = gateway();
    let device = gw.describe(&fake.uri()).expect("describe");
    let recordings = gw.list_recordings(&device).expect("list");
    let aaa = recordings.iter().find(|rec| rec.id == "aaa").expect("aaa");
    assert_eq!(gw.recording_size(&device, aaa).expect("size"), 4096);

    let mut known = aaa.clone();
    known.size_bytes = Some(7);
    assert_eq!(gw.recording_size(&device, &known).expect("known size"), 7);
}

#[test]
fn measured_catalog_reports_series_bytes() {
    let fake = FakeDevice::start().with_library(400);
    for (id, size) in [("aaa", 1_500_usize), ("bbb", 2_500), ("ccc", 900)] {
        fake.mount(
            Mock::given(method("HEAD"))
                .and(path("/recorded/play"))
                .and(query_param("id", id))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0_u8; size])),
        );
    }
    let gw = gateway();
    let device = gw.describe(&fake.uri()).expect("describe");
    let resolver = SettingsResolver::new(Config::default(), CliOverrides::default());
    let mut catalog = RecordingCatalog::fetch(&gw, &device, &resolver, unix_now()).expect("catalog");
    assert_eq!(catalog.series_bytes("C1"), 0);

    assert_eq!(catalog.measure_sizes(&gw, &device), 0);
    assert_eq!(catalog.series_bytes("C1"), 4_000);
    assert_eq!(catalog.series_bytes("C2"), 900);
    assert_eq!(catalog.watched_series_bytes("C1"), 0);

    let usage = catalog.series_usage();
    let totals: Vec<(&str, usize, u64)> = usage
        .iter()
        .map(|series| (series.series.as_str(), series.episodes, series.bytes))
        .collect();
    assert_eq!(totals, [("C1", 2, 4_000), ("C2", 1, 900)]);
}

#[test]
fn delete_posts_command_and_maps_not_found() {
    let fake = FakeDevice::start().with_library(400);
    fake.mount(
        Mock::given(method("POST"))
            .and(path("/recorded/cmd"))
            .and(query_param("id", "aaa"))
            .and(query_param("cmd", "delete"))
            .and(query_param("rerecord", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1),
    );
    fake.mount(
        Mock::given(method("POST"))
            .and(path("/recorded/cmd"))
            .and(query_param("id", "bbb"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1),
    );
    fake.mount(
        Mock::given(method("POST"))
            .and(path("/recorded/cmd"))
            .and(query_param("id", "ccc"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1),
    );

    let gw = gateway();
    let device = gw.describe(&fake.uri()).expect("describe");
    let recordings = gw.list_recordings(&device).expect("list");
    let by_id = |id: &str| recordings.iter().find(|rec| rec.id == id).expect("recording");

    assert_eq!(
        gw.delete_recording(&device, by_id("aaa"), true).expect("delete"),
        DeleteOutcome::Deleted
    );
    assert_eq!(
        gw.delete_recording(&device, by_id("bbb"), false).expect("gone"),
        DeleteOutcome::AlreadyGone
    );
    let err = gw
        .delete_recording(&device, by_id("ccc"), false)
        .expect_err("server error");
    assert!(err.is_retryable());
    fake.verify();
}

#[test]
fn rearm_posts_rule_sync() {
    let fake = FakeDevice::start().with_library(400);
    fake.mount(
        Mock::given(method("POST"))
            .and(path("/recording_events.post"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1),
    );
    let gw = gateway();
    let device = gw.describe(&fake.uri()).expect("describe");
    gw.rearm_recording_rule(&device, "C1").expect("rearm");
    fake.verify();
}

#[test]
fn maintainer_frees_space_over_http() {
    let fake = FakeDevice::start().with_library(100);
    fake.mount(
        Mock::given(method("HEAD"))
            .and(path("/recorded/play"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0_u8; 300])),
    );
    fake.mount(
        Mock::given(method("POST"))
            .and(path("/recorded/cmd"))
            .and(query_param("id", "aaa"))
            .and(query_param("cmd", "delete"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1),
    );
    fake.mount(
        Mock::given(method("POST"))
            .and(path("/recording_events.post"))
            .respond_with(ResponseTemplate::new(200)),
    );

    let gw: Arc<dyn DeviceGateway> = Arc::new(gateway());
    let device = gw.describe(&fake.uri()).expect("describe");
    let mut config = Config::default();
    config.devices.percent_free = Some(50.0);
    let resolver = Arc::new(SettingsResolver::new(config, CliOverrides::default()));
    let settings = resolver
        .resolve_device(&device.id, &device.key)
        .expect("settings");
    let remover = RecordingRemover::new(Arc::clone(&gw), Arc::new(DeleteGate::new()), None, false);
    let mut maintainer = SpaceMaintainer::new(device, settings, gw, resolver, remover, None);

    // "ccc" is older but playing, so "aaa" goes first.
    let outcome = maintainer.check().expect("pass");
    assert_eq!(outcome.deleted_recording.as_deref(), Some("aaa"));
    assert_eq!(outcome.threshold_bytes, 500);
    assert_eq!(outcome.free_bytes, 400);
    fake.verify();
}
