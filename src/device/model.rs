//! Device identity, storage figures and per-model ingest constants.

#![allow(missing_docs)]

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::units::BYTES_PER_MIB;

/// Worst-case ATSC 1.0 stream bitrate in Mbit/s.
pub const ATSC_MAX_TUNER_MBPS: f64 = 19.4;

/// Product family, derived from the model number or friendly name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    Hdvr,
    Hhdd,
    Record,
    Hdfx,
    Other(String),
}

impl ModelFamily {
    /// Parse from `ModelNumber` (`HDVR-4US-1TB`) or, failing that, `FriendlyName`
    /// (`HDHomeRun RECORD`).
    #[must_use]
    pub fn detect(model_number: &str, friendly_name: &str) -> Self {
        let captured = if model_number.is_empty() {
            capture_family(FRIENDLY_NAME_FAMILY.as_ref(), friendly_name)
        } else {
            capture_family(MODEL_NUMBER_FAMILY.as_ref(), model_number)
        };
        match captured.as_deref() {
            Some("HDVR") => Self::Hdvr,
            Some("HHDD") => Self::Hhdd,
            Some("RECORD") => Self::Record,
            Some("HDFX") => Self::Hdfx,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other(String::new()),
        }
    }

    /// Maximum simultaneous recordings for the family.
    #[must_use]
    pub const fn max_streams(&self) -> u32 {
        match self {
            Self::Hhdd => 6,
            Self::Record => 16,
            Self::Hdvr | Self::Hdfx | Self::Other(_) => 4,
        }
    }
}

static FRIENDLY_NAME_FAMILY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^HDHomeRun (?P<family>.+)$").ok());
static MODEL_NUMBER_FAMILY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?P<family>[A-Z]{4})-").ok());

fn capture_family(pattern: Option<&Regex>, haystack: &str) -> Option<String> {
    pattern?
        .captures(haystack)
        .and_then(|caps| caps.name("family"))
        .map(|m| m.as_str().trim().to_string())
}

/// One storage device. Identity is fixed for the lifetime of a monitoring run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Hardware id, or the host when the device does not report one.
    pub id: String,
    /// Name the operator used to address the device.
    pub key: String,
    /// `http://host[:port]` without trailing slash.
    pub base_url: String,
    pub friendly_name: String,
    pub model_number: String,
    pub storage_id: String,
    pub storage_url: String,
}

impl Device {
    /// Display label such as `[HDHomeRun SCRIBE QUATRO 1051ABCD (dvr.local)]`.
    #[must_use]
    pub fn tag(&self) -> String {
        let mut tag = format!("[{} {}", self.friendly_name, self.id);
        if self.key != self.id {
            tag.push_str(&format!(" ({})", self.key));
        }
        tag.push(']');
        tag
    }

    #[must_use]
    pub fn family(&self) -> ModelFamily {
        ModelFamily::detect(&self.model_number, &self.friendly_name)
    }

    /// Worst-case combined ingest rate across every tuner, in bytes/second.
    #[must_use]
    pub fn max_recording_bytes_per_sec(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let per_stream = ATSC_MAX_TUNER_MBPS / 8.0 * BYTES_PER_MIB as f64;
        per_stream * f64::from(self.family().max_streams())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Capacity and free space at the time of the last fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl StorageStats {
    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    #[must_use]
    pub fn free_pct(&self) -> f64 {
        pct_of(self.free_bytes, self.total_bytes)
    }

    #[must_use]
    pub fn used_pct(&self) -> f64 {
        if self.free_bytes == 0 {
            return 100.0;
        }
        pct_of(self.used_bytes(), self.total_bytes)
    }
}

/// `part` as a percentage of `whole`; `0.0` for an empty whole.
#[must_use]
pub fn pct_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        part as f64 * 100.0 / whole as f64
    }
}
