//! Layered settings resolution: config file + CLI overrides into immutable
//! per-device and per-recording values.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::core::config::{Config, DeviceOverrides, RuleOverrides};
use crate::core::errors::{DskError, Result};
use crate::core::units::BYTES_PER_GB;
use crate::policy::DeletePolicy;

/// Default seconds of unwatched tail below which a recording counts as watched.
pub const DEFAULT_WATCHED_OFFSET_SECS: u64 = 180;

// ──────────────────── rerecord ────────────────────

/// Whether a deleted recording's rule is re-armed so it can be captured again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerecordPolicy {
    #[default]
    All,
    Unwatched,
    None,
}

impl RerecordPolicy {
    /// Re-arm unless the policy is `none`, or it is `unwatched` and the recording was watched.
    #[must_use]
    pub const fn should_rearm(self, watched: bool) -> bool {
        match self {
            Self::All => true,
            Self::Unwatched => !watched,
            Self::None => false,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Unwatched => "unwatched",
            Self::None => "none",
        }
    }
}

impl fmt::Display for RerecordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RerecordPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "unwatched" => Ok(Self::Unwatched),
            "none" => Ok(Self::None),
            other => Err(format!("expected all, unwatched or none, got {other:?}")),
        }
    }
}

// ──────────────────── device scope ────────────────────

/// Minimum free space, either absolute or relative to device capacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeSpaceThreshold {
    Gigabytes(f64),
    Percent(f64),
}

impl FreeSpaceThreshold {
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn bytes_for(self, total_bytes: u64) -> u64 {
        match self {
            Self::Gigabytes(gb) => (gb * BYTES_PER_GB as f64) as u64,
            Self::Percent(pct) => (total_bytes as f64 * pct / 100.0) as u64,
        }
    }
}

impl fmt::Display for FreeSpaceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gigabytes(gb) => write!(f, "{gb} GB"),
            Self::Percent(pct) => write!(f, "{pct}%"),
        }
    }
}

/// Fully resolved settings for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSettings {
    pub report_interval: Duration,
    /// `None` reports forever; `Some(0)` disables reporting.
    pub report_count: Option<u64>,
    /// `None` means report only, no space maintenance.
    pub threshold: Option<FreeSpaceThreshold>,
    /// Fixed maintenance interval; `None` means adaptive.
    pub check_interval: Option<Duration>,
}

impl DeviceSettings {
    /// Minimum free bytes for a device of the given capacity; `0` when unset.
    pub fn min_free_bytes(&self, device: &str, total_bytes: u64) -> Result<u64> {
        let Some(threshold) = self.threshold else {
            return Ok(0);
        };
        let bytes = threshold.bytes_for(total_bytes);
        if bytes > total_bytes {
            return Err(DskError::ConfigurationConflict {
                scope: format!("device {device}"),
                details: format!(
                    "minimum free space {threshold} ({bytes} bytes) exceeds total capacity ({total_bytes} bytes)"
                ),
            });
        }
        Ok(bytes)
    }

    #[must_use]
    pub fn reports_enabled(&self) -> bool {
        self.report_count != Some(0)
    }
}

// ──────────────────── recording scope ────────────────────

/// Fully merged rule for one category/series combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EffectiveSettings {
    pub protected: bool,
    pub delete_order: i32,
    pub max_episodes: Option<u32>,
    pub max_age_days: Option<f64>,
    pub min_age_days: Option<f64>,
    pub watched_offset_secs: u64,
    pub rerecord: RerecordPolicy,
}

impl EffectiveSettings {
    /// Built-in defaults for a category.
    #[must_use]
    pub const fn for_category(category: Category) -> Self {
        Self {
            protected: false,
            delete_order: category.default_delete_order(),
            max_episodes: None,
            max_age_days: None,
            min_age_days: None,
            watched_offset_secs: DEFAULT_WATCHED_OFFSET_SECS,
            rerecord: RerecordPolicy::All,
        }
    }

    fn apply(&mut self, layer: &RuleOverrides) {
        if let Some(protected) = layer.protected {
            self.protected = protected;
        }
        if let Some(order) = layer.delete_order {
            self.delete_order = order;
        }
        if layer.max_episodes.is_some() {
            self.max_episodes = layer.max_episodes;
        }
        if layer.max_age_days.is_some() {
            self.max_age_days = layer.max_age_days;
        }
        if layer.min_age_days.is_some() {
            self.min_age_days = layer.min_age_days;
        }
        if let Some(offset) = layer.watched_offset_secs {
            self.watched_offset_secs = offset;
        }
        if let Some(rerecord) = layer.rerecord {
            self.rerecord = rerecord;
        }
    }

    /// Whether the retention sweep has anything to enforce here.
    #[must_use]
    pub fn has_retention_limit(&self) -> bool {
        !self.protected && (self.max_episodes.is_some() || self.max_age_days.is_some())
    }
}

// ──────────────────── resolver ────────────────────

/// Explicit command-line layer; wins over every config layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub delete_policy: Option<DeletePolicy>,
    pub watched_first: Option<bool>,
    pub watched_offset_secs: Option<u64>,
    pub gigabytes_free: Option<f64>,
    pub percent_free: Option<f64>,
    pub report_interval_secs: Option<u64>,
    pub report_count: Option<u64>,
    pub check_interval_secs: Option<u64>,
}

impl CliOverrides {
    fn device_layer(&self) -> DeviceOverrides {
        DeviceOverrides {
            report_interval_secs: self.report_interval_secs,
            report_count: self.report_count,
            gigabytes_free: self.gigabytes_free,
            percent_free: self.percent_free,
            check_interval_secs: self.check_interval_secs,
        }
    }
}

/// Resolves device and recording settings from config plus CLI layers.
#[derive(Debug, Clone)]
pub struct SettingsResolver {
    config: Config,
    cli: CliOverrides,
}

impl SettingsResolver {
    #[must_use]
    pub const fn new(config: Config, cli: CliOverrides) -> Self {
        Self { config, cli }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn delete_policy(&self) -> DeletePolicy {
        self.cli
            .delete_policy
            .unwrap_or(self.config.policy.delete_policy)
    }

    #[must_use]
    pub fn watched_first(&self) -> bool {
        self.cli
            .watched_first
            .unwrap_or(self.config.policy.watched_first)
    }

    /// Hosts from the config; `--device` hosts replace this list at the call site.
    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.config.devices.hosts
    }

    pub fn resolve_device(&self, device_id: &str, host: &str) -> Result<DeviceSettings> {
        let mut layers: Vec<(String, DeviceOverrides)> =
            vec![("devices".to_string(), self.config.device_defaults())];
        for key in [device_id, host] {
            if let Some(layer) = self.config.devices.overrides.get(key) {
                layers.push((format!("device {key}"), layer.clone()));
            }
        }
        layers.push(("command line".to_string(), self.cli.device_layer()));

        let mut report_interval_secs = crate::core::config::DEFAULT_REPORT_INTERVAL_SECS;
        let mut report_count = None;
        let mut threshold = None;
        let mut check_interval_secs = None;

        for (scope, layer) in &layers {
            match (layer.gigabytes_free, layer.percent_free) {
                (Some(_), Some(_)) => {
                    return Err(DskError::ConfigurationConflict {
                        scope: scope.clone(),
                        details: "gigabytes_free and percent_free cannot both be specified"
                            .to_string(),
                    });
                }
                (Some(gb), None) => threshold = Some(FreeSpaceThreshold::Gigabytes(gb)),
                (None, Some(pct)) => threshold = Some(FreeSpaceThreshold::Percent(pct)),
                (None, None) => {}
            }
            if let Some(secs) = layer.report_interval_secs {
                report_interval_secs = secs;
            }
            if layer.report_count.is_some() {
                report_count = layer.report_count;
            }
            if layer.check_interval_secs.is_some() {
                check_interval_secs = layer.check_interval_secs;
            }
        }

        if report_interval_secs == 0 || check_interval_secs == Some(0) {
            return Err(DskError::InvalidConfig {
                details: format!("device {device_id}: intervals must be > 0"),
            });
        }

        Ok(DeviceSettings {
            report_interval: Duration::from_secs(report_interval_secs),
            report_count,
            threshold,
            check_interval: check_interval_secs.map(Duration::from_secs),
        })
    }

    /// Merge category defaults, retention defaults, category, series and CLI layers.
    #[must_use]
    pub fn resolve(
        &self,
        category: Category,
        series_id: &str,
        series_title: &str,
    ) -> EffectiveSettings {
        let mut settings = EffectiveSettings::for_category(category);
        settings.apply(&self.config.retention.as_rules());
        if let Some(layer) = self.config.categories.get(category.as_str()) {
            settings.apply(layer);
        }
        if let Some(layer) = self.config.series.get(series_title) {
            settings.apply(layer);
        }
        if series_id != series_title
            && let Some(layer) = self.config.series.get(series_id)
        {
            settings.apply(layer);
        }
        if let Some(offset) = self.cli.watched_offset_secs {
            settings.watched_offset_secs = offset;
        }
        settings
    }
}
