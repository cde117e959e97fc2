//! DSK-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DskError>;

/// Top-level error type for the DVR space keeper.
#[derive(Debug, Error)]
pub enum DskError {
    #[error("[DSK-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DSK-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DSK-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DSK-1004] configuration conflict for {scope}: {details}")]
    ConfigurationConflict { scope: String, details: String },

    #[error("[DSK-2001] device {device} unavailable: {details}")]
    TransientDevice { device: String, details: String },

    #[error("[DSK-2002] device {device} returned malformed data: {details}")]
    DeviceProtocol { device: String, details: String },

    #[error("[DSK-2101] no deletable recordings on {device}")]
    NoEligibleCandidate { device: String },

    #[error("[DSK-2102] recording {recording} on {device} is already gone")]
    DeleteRaceLost { device: String, recording: String },

    #[error("[DSK-2103] recording {recording} is {activity} right now")]
    RecordingActive {
        recording: String,
        activity: &'static str,
    },

    #[error("[DSK-2201] no devices to monitor: {details}")]
    NoDevices { details: String },

    #[error("[DSK-3101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DSK-3102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[DSK-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DSK-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[DSK-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DskError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DSK-1001",
            Self::MissingConfig { .. } => "DSK-1002",
            Self::ConfigParse { .. } => "DSK-1003",
            Self::ConfigurationConflict { .. } => "DSK-1004",
            Self::TransientDevice { .. } => "DSK-2001",
            Self::DeviceProtocol { .. } => "DSK-2002",
            Self::NoEligibleCandidate { .. } => "DSK-2101",
            Self::DeleteRaceLost { .. } => "DSK-2102",
            Self::RecordingActive { .. } => "DSK-2103",
            Self::NoDevices { .. } => "DSK-2201",
            Self::Serialization { .. } => "DSK-3101",
            Self::Sql { .. } => "DSK-3102",
            Self::Io { .. } => "DSK-3002",
            Self::ChannelClosed { .. } => "DSK-3003",
            Self::Runtime { .. } => "DSK-3900",
        }
    }

    /// Whether retrying on the next scheduled tick might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientDevice { .. }
                | Self::DeviceProtocol { .. }
                | Self::NoEligibleCandidate { .. }
                | Self::RecordingActive { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether the failure means the work already happened elsewhere.
    #[must_use]
    pub const fn is_success_equivalent(&self) -> bool {
        matches!(self, Self::DeleteRaceLost { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a transient device failure.
    #[must_use]
    pub fn transient(device: impl Into<String>, details: impl Into<String>) -> Self {
        Self::TransientDevice {
            device: device.into(),
            details: details.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DskError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for DskError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DskError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<reqwest::Error> for DskError {
    fn from(value: reqwest::Error) -> Self {
        let device = value
            .url()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        if value.is_decode() {
            Self::DeviceProtocol {
                device,
                details: value.to_string(),
            }
        } else {
            Self::TransientDevice {
                device,
                details: value.to_string(),
            }
        }
    }
}
