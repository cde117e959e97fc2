//! Free-space reports and recording listings, plus the periodic reporter.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{Recording, SeriesUsage};
use crate::core::errors::Result;
use crate::core::settings::DeviceSettings;
use crate::core::units::{byte_size, ctime, duration_text};
use crate::daemon::signals::StopToken;
use crate::device::model::pct_of;
use crate::device::{Device, DeviceGateway, StorageStats};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

/// Width of the `#` header above each device's listing.
pub const LIST_HEADER_WIDTH: usize = 78;

// ──────────────────── formatting ────────────────────

/// `"<tag> Total: X; Used: Y (p%); Free: Z (q%)[; Minimum Free: M (r%)]"`
#[must_use]
pub fn format_space_report(device: &Device, stats: &StorageStats, min_free_bytes: u64) -> String {
    let mut line = format!(
        "{} Total: {}; Used: {} ({:.1}%); Free: {} ({:.1}%)",
        device.tag(),
        byte_size(stats.total_bytes),
        byte_size(stats.used_bytes()),
        stats.used_pct(),
        byte_size(stats.free_bytes),
        stats.free_pct(),
    );
    if min_free_bytes > 0 {
        let _ = write!(
            line,
            "; Minimum Free: {} ({:.1}%)",
            byte_size(min_free_bytes),
            pct_of(min_free_bytes, stats.total_bytes)
        );
    }
    line
}

/// `"##### <tag> #####"`, [`LIST_HEADER_WIDTH`] wide for short tags.
#[must_use]
pub fn list_header(tag: &str) -> String {
    let tag_width = tag.chars().count() + 2;
    let left = LIST_HEADER_WIDTH.saturating_sub(tag_width) / 2;
    let right = LIST_HEADER_WIDTH.saturating_sub(left + tag_width);
    format!(
        "{} {tag} {}",
        "#".repeat(left.saturating_sub(1)),
        "#".repeat(right.saturating_sub(1))
    )
}

/// `"<ctime>: <title>[ (watched)][ (protected)]"`
#[must_use]
pub fn list_line(recording: &Recording) -> String {
    let mut line = format!("{}: {}", ctime(recording.start_time()), recording.title());
    if recording.watched {
        line.push_str(" (watched)");
    }
    if recording.protected {
        line.push_str(" (protected)");
    }
    line
}

/// Header plus one line per recording, already in delete order.
#[must_use]
pub fn format_recording_list(device: &Device, ordered: &[&Recording]) -> String {
    let mut out = list_header(&device.tag());
    out.push('\n');
    for recording in ordered {
        out.push_str(&list_line(recording));
        out.push('\n');
    }
    out
}

/// `"  <title>: N episode(s), X (Y watched)"`, one line per series.
#[must_use]
pub fn format_series_usage(usage: &[SeriesUsage]) -> String {
    let mut out = String::new();
    for series in usage {
        let _ = writeln!(
            out,
            "  {}: {} episode{}, {} ({} watched)",
            series.title,
            series.episodes,
            if series.episodes == 1 { "" } else { "s" },
            byte_size(series.bytes),
            byte_size(series.watched_bytes),
        );
    }
    out
}

/// Machine-readable listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct ListedRecording {
    pub device_id: String,
    pub id: String,
    pub title: String,
    pub series: String,
    pub category: String,
    pub scheduled: i64,
    pub watched: bool,
    pub protected: bool,
    pub playing: bool,
    pub recording: bool,
    pub size_bytes: Option<u64>,
    pub delete_rank: Option<usize>,
}

impl ListedRecording {
    /// `rank` is the 1-based position among deletable recordings.
    #[must_use]
    pub fn new(recording: &Recording, rank: Option<usize>) -> Self {
        Self {
            device_id: recording.device_id.clone(),
            id: recording.id().to_string(),
            title: recording.title().to_string(),
            series: recording.series_key().to_string(),
            category: recording.category.as_str().to_string(),
            scheduled: recording.start_time(),
            watched: recording.watched,
            protected: recording.protected,
            playing: recording.playing,
            recording: recording.recording,
            size_bytes: recording.raw.size_bytes,
            delete_rank: rank,
        }
    }
}

// ──────────────────── periodic reporter ────────────────────

/// One measured report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceReport {
    pub device_id: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub min_free_bytes: u64,
    pub message: String,
}

impl SpaceReport {
    /// Fetch stats and format a report for one device.
    pub fn measure(gateway: &dyn DeviceGateway, device: &Device, settings: &DeviceSettings) -> Result<Self> {
        let stats = gateway.storage_stats(device)?;
        let min_free_bytes = settings.min_free_bytes(&device.id, stats.total_bytes)?;
        Ok(Self {
            device_id: device.id.clone(),
            total_bytes: stats.total_bytes,
            free_bytes: stats.free_bytes,
            min_free_bytes,
            message: format_space_report(device, &stats, min_free_bytes),
        })
    }

    #[must_use]
    pub fn into_event(self) -> ActivityEvent {
        ActivityEvent::SpaceReport {
            device_id: self.device_id,
            total_bytes: self.total_bytes,
            free_bytes: self.free_bytes,
            min_free_bytes: (self.min_free_bytes > 0).then_some(self.min_free_bytes),
            message: self.message,
        }
    }
}

/// Reports one device's space every `interval`, optionally `count` times.
pub struct ReportScheduler {
    device: Device,
    settings: DeviceSettings,
    gateway: Arc<dyn DeviceGateway>,
    logger: Option<ActivityLoggerHandle>,
}

impl ReportScheduler {
    pub fn new(
        device: Device,
        settings: DeviceSettings,
        gateway: Arc<dyn DeviceGateway>,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            device,
            settings,
            gateway,
            logger,
        }
    }

    /// `"<tag> Disk space utilization will be reported every X[, stopping after N reports]"`
    #[must_use]
    pub fn describe(&self) -> String {
        let mut msg = format!(
            "{} Disk space utilization will be reported every {}",
            self.device.tag(),
            duration_text(self.settings.report_interval.as_secs())
        );
        if let Some(count) = self.settings.report_count {
            let noun = if count == 1 { "report" } else { "reports" };
            let _ = write!(msg, ", stopping after {count} {noun}");
        }
        msg
    }

    /// Measure and emit one report.
    pub fn report_once(&self) -> Result<SpaceReport> {
        let report = SpaceReport::measure(self.gateway.as_ref(), &self.device, &self.settings)?;
        if let Some(logger) = &self.logger {
            logger.send(report.clone().into_event());
        }
        Ok(report)
    }

    /// Report immediately, then every interval, until the count is reached or
    /// `stop` fires. Returns the number of attempts made.
    pub fn run(&self, stop: &StopToken, mut on_report: impl FnMut(&Result<SpaceReport>)) -> u64 {
        let mut attempts: u64 = 0;
        loop {
            if self.settings.report_count.is_some_and(|count| attempts >= count) {
                return attempts;
            }
            if attempts > 0 && !stop.sleep(self.settings.report_interval) {
                return attempts;
            }
            let result = self.report_once();
            if let Err(e) = &result
                && let Some(logger) = &self.logger
            {
                logger.send(ActivityEvent::Warning {
                    device_id: Some(self.device.id.clone()),
                    message: format!("{} Space report failed: {e}", self.device.tag()),
                });
            }
            on_report(&result);
            attempts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::core::settings::FreeSpaceThreshold;
    use crate::core::units::BYTES_PER_GB;
    use crate::device::mock::{MockGateway, mock_device};

    fn device() -> Device {
        let mut device = mock_device("1051ABCD", "HDVR-4US-1TB");
        device.friendly_name = "HDHomeRun SCRIBE".to_string();
        device
    }

    fn settings(count: Option<u64>, threshold: Option<FreeSpaceThreshold>) -> DeviceSettings {
        DeviceSettings {
            report_interval: Duration::from_millis(10),
            report_count: count,
            threshold,
            check_interval: None,
        }
    }

    #[test]
    fn space_report_with_minimum() {
        let stats = StorageStats {
            total_bytes: 1_000 * BYTES_PER_GB,
            free_bytes: 80 * BYTES_PER_GB,
        };
        let line = format_space_report(&device(), &stats, 20 * BYTES_PER_GB);
        assert_eq!(
            line,
            format!(
                "{} Total: 1.00 TB; Used: 920.00 GB (92.0%); Free: 80.00 GB (8.0%); \
                 Minimum Free: 20.00 GB (2.0%)",
                device().tag()
            )
        );
    }

    #[test]
    fn space_report_full_disk() {
        let stats = StorageStats {
            total_bytes: 500,
            free_bytes: 0,
        };
        let line = format_space_report(&device(), &stats, 0);
        assert!(line.ends_with("Used: 500.00 B (100.0%); Free: 0.00 B (0.0%)"));
        assert!(!line.contains("Minimum"));
    }

    #[test]
    fn header_is_centered() {
        let header = list_header("[HDHomeRun SCRIBE 1051ABCD]");
        let tag_width = "[HDHomeRun SCRIBE 1051ABCD]".len() + 2;
        let left = (LIST_HEADER_WIDTH - tag_width) / 2;
        assert!(header.starts_with(&format!("{} [", "#".repeat(left - 1))));
        assert_eq!(header.chars().count(), LIST_HEADER_WIDTH - 2);
    }

    #[test]
    fn header_tolerates_long_tags() {
        let tag = "x".repeat(100);
        assert_eq!(list_header(&tag), format!(" {tag} "));
    }

    #[test]
    fn series_usage_lines() {
        let usage = [
            SeriesUsage {
                series: "C1".to_string(),
                title: "Show A".to_string(),
                episodes: 2,
                bytes: 3_000_000_000,
                watched_bytes: 1_000_000_000,
            },
            SeriesUsage {
                series: "C2".to_string(),
                title: "Show B".to_string(),
                episodes: 1,
                bytes: 0,
                watched_bytes: 0,
            },
        ];
        let text = format_series_usage(&usage);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  Show A: 2 episodes, "));
        assert!(lines[0].ends_with(" watched)"));
        assert!(lines[1].starts_with("  Show B: 1 episode, "));
    }

    #[test]
    fn describe_mentions_count() {
        let gateway: Arc<dyn DeviceGateway> = Arc::new(MockGateway::new());
        let scheduler = ReportScheduler::new(device(), settings(Some(1), None), gateway, None);
        assert!(scheduler.describe().ends_with(", stopping after 1 report"));
    }

    #[test]
    fn run_honours_count() {
        let gw = Arc::new(MockGateway::new().with_device(
            device(),
            StorageStats {
                total_bytes: 1_000,
                free_bytes: 400,
            },
        ));
        let (logger, rx) = ActivityLoggerHandle::channel(16);
        let shared: Arc<dyn DeviceGateway> = gw;
        let scheduler = ReportScheduler::new(
            device(),
            settings(Some(3), Some(FreeSpaceThreshold::Percent(10.0))),
            shared,
            Some(logger),
        );
        assert_eq!(scheduler.run(&StopToken::new(), |_| {}), 3);
        let reports: Vec<ActivityEvent> = rx.try_iter().collect();
        assert_eq!(reports.len(), 3);
        match &reports[0] {
            ActivityEvent::SpaceReport {
                min_free_bytes,
                message,
                ..
            } => {
                assert_eq!(*min_free_bytes, Some(100));
                assert!(message.contains("Minimum Free: 100.00 B (10.0%)"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_count_reports_nothing() {
        let gateway: Arc<dyn DeviceGateway> = Arc::new(MockGateway::new());
        let scheduler = ReportScheduler::new(device(), settings(Some(0), None), gateway, None);
        assert_eq!(scheduler.run(&StopToken::new(), |_| {}), 0);
    }

    #[test]
    fn failed_reports_still_count() {
        let gateway: Arc<dyn DeviceGateway> = Arc::new(MockGateway::new());
        let scheduler = ReportScheduler::new(device(), settings(Some(2), None), gateway, None);
        let mut failures = 0;
        let attempts = scheduler.run(&StopToken::new(), |result| {
            if result.is_err() {
                failures += 1;
            }
        });
        assert_eq!((attempts, failures), (2, 2));
    }
}
