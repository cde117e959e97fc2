//! Unit constants and human-readable formatting for sizes, durations and times.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use chrono::{Local, TimeZone};

pub const BYTES_PER_KB: u64 = 1_000;
pub const BYTES_PER_MB: u64 = 1_000_000;
pub const BYTES_PER_GB: u64 = 1_000_000_000;
pub const BYTES_PER_TB: u64 = 1_000_000_000_000;
pub const BYTES_PER_MIB: u64 = 1 << 20;

pub const MINUTE_SECONDS: u64 = 60;
pub const HOUR_SECONDS: u64 = 60 * MINUTE_SECONDS;
pub const DAY_SECONDS: u64 = 24 * HOUR_SECONDS;

/// Decimal byte size with two fractional digits (`"837.33 GB"`).
#[must_use]
pub fn byte_size(bytes: u64) -> String {
    byte_size_with(bytes as f64, 2)
}

/// Decimal byte size with an explicit number of fractional digits.
#[must_use]
pub fn byte_size_with(bytes: f64, digits: usize) -> String {
    let (divisor, unit) = if bytes >= BYTES_PER_TB as f64 {
        (BYTES_PER_TB, "TB")
    } else if bytes >= BYTES_PER_GB as f64 {
        (BYTES_PER_GB, "GB")
    } else if bytes >= BYTES_PER_MB as f64 {
        (BYTES_PER_MB, "MB")
    } else if bytes >= BYTES_PER_KB as f64 {
        (BYTES_PER_KB, "KB")
    } else {
        (1, "B")
    };
    format!("{:.digits$} {unit}", bytes / divisor as f64)
}

/// Human duration such as `"8 days, 5 hours, 34 minutes"`.
#[must_use]
pub fn duration_text(seconds: u64) -> String {
    if seconds == 0 {
        return "0 seconds".to_string();
    }

    let mut parts = Vec::with_capacity(4);
    let mut remaining = seconds;
    for (size, singular, plural) in [
        (DAY_SECONDS, "day", "days"),
        (HOUR_SECONDS, "hour", "hours"),
        (MINUTE_SECONDS, "minute", "minutes"),
        (1, "second", "seconds"),
    ] {
        if remaining >= size {
            let count = remaining / size;
            remaining -= count * size;
            let noun = if count == 1 { singular } else { plural };
            parts.push(format!("{count} {noun}"));
        }
    }
    parts.join(", ")
}

/// Local time in the classic `ctime` layout (`"Sun Jun  7 18:00:00 2020"`).
#[must_use]
pub fn ctime(unix_secs: i64) -> String {
    Local
        .timestamp_opt(unix_secs, 0)
        .single()
        .map_or_else(
            || format!("@{unix_secs}"),
            |t| t.format("%a %b %e %H:%M:%S %Y").to_string(),
        )
}

/// Current wall-clock time as UNIX seconds.
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
