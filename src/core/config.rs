//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::core::errors::{DskError, Result};
use crate::core::settings::RerecordPolicy;
use crate::policy::DeletePolicy;

/// Default seconds between free-space reports.
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 600;
/// Default seconds between retention sweeps.
pub const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 13 * 60;

/// Full configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub policy: PolicyConfig,
    pub devices: DevicesConfig,
    pub retention: RetentionConfig,
    /// Per-category rules keyed by category name.
    pub categories: BTreeMap<String, RuleOverrides>,
    /// Per-series rules keyed by series id or series title.
    pub series: BTreeMap<String, RuleOverrides>,
    pub gateway: GatewayConfig,
    pub paths: PathsConfig,
}

/// Global delete ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub delete_policy: DeletePolicy,
    pub watched_first: bool,
}

/// Device list plus device-scoped defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevicesConfig {
    /// Host names, IP addresses or base URLs of the storage devices.
    pub hosts: Vec<String>,
    pub report_interval_secs: u64,
    /// Stop reporting after this many reports. `None` reports forever.
    pub report_count: Option<u64>,
    pub gigabytes_free: Option<f64>,
    pub percent_free: Option<f64>,
    /// Fixed maintenance interval; disables the adaptive interval when set.
    pub check_interval_secs: Option<u64>,
    /// Overrides keyed by device id or host.
    pub overrides: BTreeMap<String, DeviceOverrides>,
}

/// Device-scoped fields that can be overridden per device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DeviceOverrides {
    pub report_interval_secs: Option<u64>,
    pub report_count: Option<u64>,
    pub gigabytes_free: Option<f64>,
    pub percent_free: Option<f64>,
    pub check_interval_secs: Option<u64>,
}

/// Retention sweep cadence plus rule defaults shared by every category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub interval_secs: u64,
    pub protected: Option<bool>,
    pub max_episodes: Option<u32>,
    pub max_age_days: Option<f64>,
    pub min_age_days: Option<f64>,
    pub watched_offset_secs: Option<u64>,
    pub rerecord: Option<RerecordPolicy>,
}

/// Recording rule fields; every field is optional and inherits when unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RuleOverrides {
    pub protected: Option<bool>,
    /// Only meaningful on categories.
    pub delete_order: Option<i32>,
    pub max_episodes: Option<u32>,
    pub max_age_days: Option<f64>,
    pub min_age_days: Option<f64>,
    pub watched_offset_secs: Option<u64>,
    pub rerecord: Option<RerecordPolicy>,
}

/// Device web API client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    pub timeout_secs: u64,
}

/// Log and history locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
    pub sqlite_db: PathBuf,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            report_interval_secs: DEFAULT_REPORT_INTERVAL_SECS,
            report_count: None,
            gigabytes_free: None,
            percent_free: None,
            check_interval_secs: None,
            overrides: BTreeMap::new(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_RETENTION_INTERVAL_SECS,
            protected: None,
            max_episodes: None,
            max_age_days: None,
            min_age_days: None,
            watched_offset_secs: None,
            rerecord: None,
        }
    }
}

impl RetentionConfig {
    /// The rule defaults as an override layer.
    #[must_use]
    pub fn as_rules(&self) -> RuleOverrides {
        RuleOverrides {
            protected: self.protected,
            delete_order: None,
            max_episodes: self.max_episodes,
            max_age_days: self.max_age_days,
            min_age_days: self.min_age_days,
            watched_offset_secs: self.watched_offset_secs,
            rerecord: self.rerecord,
        }
    }
}

impl RuleOverrides {
    fn has_retention_limit(&self) -> bool {
        self.max_episodes.is_some() || self.max_age_days.is_some()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        let data = home.join(".local").join("share").join("dsk");
        Self {
            config_file: home.join(".config").join("dsk").join("config.toml"),
            jsonl_log: data.join("activity.jsonl"),
            sqlite_db: data.join("history.sqlite3"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    /// Same as [`Config::load`] with an explicit environment lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DskError::Io {
                path: path_buf.clone(),
                source,
            })?;
            Self::from_toml(&raw)?
        } else if is_explicit_path {
            return Err(DskError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without env overrides or validation.
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Whether any scope asks for age or episode-count retention.
    #[must_use]
    pub fn has_retention_rules(&self) -> bool {
        self.retention.as_rules().has_retention_limit()
            || self.categories.values().any(RuleOverrides::has_retention_limit)
            || self.series.values().any(RuleOverrides::has_retention_limit)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DSK_DELETE_POLICY") {
            self.policy.delete_policy =
                raw.parse().map_err(|details: String| DskError::ConfigParse {
                    context: "env",
                    details: format!("DSK_DELETE_POLICY={raw:?}: {details}"),
                })?;
        }
        if let Some(raw) = lookup("DSK_WATCHED_FIRST") {
            self.policy.watched_first = parse_env("DSK_WATCHED_FIRST", &raw)?;
        }
        if let Some(raw) = lookup("DSK_GIGABYTES_FREE") {
            self.devices.gigabytes_free = Some(parse_env("DSK_GIGABYTES_FREE", &raw)?);
            self.devices.percent_free = None;
        }
        if let Some(raw) = lookup("DSK_PERCENT_FREE") {
            self.devices.percent_free = Some(parse_env("DSK_PERCENT_FREE", &raw)?);
            self.devices.gigabytes_free = None;
        }
        if let Some(raw) = lookup("DSK_REPORT_INTERVAL_SECS") {
            self.devices.report_interval_secs = parse_env("DSK_REPORT_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("DSK_CHECK_INTERVAL_SECS") {
            self.devices.check_interval_secs = Some(parse_env("DSK_CHECK_INTERVAL_SECS", &raw)?);
        }
        if let Some(raw) = lookup("DSK_RETENTION_INTERVAL_SECS") {
            self.retention.interval_secs = parse_env("DSK_RETENTION_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("DSK_GATEWAY_TIMEOUT_SECS") {
            self.gateway.timeout_secs = parse_env("DSK_GATEWAY_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("DSK_HOSTS") {
            self.devices.hosts = raw
                .split(',')
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = lookup("DSK_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_device_scope("devices", &self.device_defaults())?;
        for (key, overrides) in &self.devices.overrides {
            validate_device_scope(&format!("device {key}"), overrides)?;
        }
        if self.devices.report_interval_secs == 0 {
            return Err(DskError::InvalidConfig {
                details: "devices.report_interval_secs must be > 0".to_string(),
            });
        }
        if self.retention.interval_secs == 0 {
            return Err(DskError::InvalidConfig {
                details: "retention.interval_secs must be > 0".to_string(),
            });
        }
        if self.gateway.timeout_secs == 0 {
            return Err(DskError::InvalidConfig {
                details: "gateway.timeout_secs must be > 0".to_string(),
            });
        }

        validate_rules("retention", &self.retention.as_rules())?;
        for (name, rules) in &self.categories {
            if name.parse::<Category>().is_err() {
                return Err(DskError::InvalidConfig {
                    details: format!(
                        "unknown category {name:?}; expected one of news, series, sport, movie, special"
                    ),
                });
            }
            validate_rules(&format!("category {name}"), rules)?;
        }
        for (key, rules) in &self.series {
            if rules.delete_order.is_some() {
                return Err(DskError::InvalidConfig {
                    details: format!("series {key}: delete_order is only valid on categories"),
                });
            }
            validate_rules(&format!("series {key}"), rules)?;
        }
        Ok(())
    }

    /// Non-fatal findings worth surfacing at startup.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let scopes = self
            .categories
            .iter()
            .map(|(name, rules)| (format!("category {name}"), rules))
            .chain(
                self.series
                    .iter()
                    .map(|(key, rules)| (format!("series {key}"), rules)),
            );
        for (scope, rules) in scopes {
            if rules.protected == Some(true) && rules.has_retention_limit() {
                warnings.push(format!(
                    "{scope} is protected; its max_episodes/max_age_days will not be enforced"
                ));
            }
            if let (Some(min), Some(max)) = (rules.min_age_days, rules.max_age_days)
                && min > max
            {
                warnings.push(format!(
                    "{scope} has min_age_days ({min}) above max_age_days ({max}); recordings are kept until {min} days old"
                ));
            }
        }
        warnings
    }

    /// The device-wide defaults as an override layer.
    #[must_use]
    pub fn device_defaults(&self) -> DeviceOverrides {
        DeviceOverrides {
            report_interval_secs: Some(self.devices.report_interval_secs),
            report_count: self.devices.report_count,
            gigabytes_free: self.devices.gigabytes_free,
            percent_free: self.devices.percent_free,
            check_interval_secs: self.devices.check_interval_secs,
        }
    }
}

fn validate_device_scope(scope: &str, overrides: &DeviceOverrides) -> Result<()> {
    if overrides.gigabytes_free.is_some() && overrides.percent_free.is_some() {
        return Err(DskError::ConfigurationConflict {
            scope: scope.to_string(),
            details: "gigabytes_free and percent_free cannot both be specified".to_string(),
        });
    }
    if let Some(gb) = overrides.gigabytes_free
        && !(gb.is_finite() && gb > 0.0)
    {
        return Err(DskError::InvalidConfig {
            details: format!("{scope}: gigabytes_free must be > 0, got {gb}"),
        });
    }
    if let Some(pct) = overrides.percent_free
        && !(pct > 0.0 && pct <= 100.0)
    {
        return Err(DskError::InvalidConfig {
            details: format!("{scope}: percent_free must be in (0, 100], got {pct}"),
        });
    }
    if overrides.check_interval_secs == Some(0) || overrides.report_interval_secs == Some(0) {
        return Err(DskError::InvalidConfig {
            details: format!("{scope}: intervals must be > 0"),
        });
    }
    Ok(())
}

fn validate_rules(scope: &str, rules: &RuleOverrides) -> Result<()> {
    if rules.max_episodes == Some(0) {
        return Err(DskError::InvalidConfig {
            details: format!("{scope}: max_episodes must be >= 1"),
        });
    }
    if let Some(days) = rules.max_age_days
        && !(days.is_finite() && days > 0.0)
    {
        return Err(DskError::InvalidConfig {
            details: format!("{scope}: max_age_days must be > 0, got {days}"),
        });
    }
    if let Some(days) = rules.min_age_days
        && !(days.is_finite() && days >= 0.0)
    {
        return Err(DskError::InvalidConfig {
            details: format!("{scope}: min_age_days must be >= 0, got {days}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| DskError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
