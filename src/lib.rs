#![forbid(unsafe_code)]

//! DVR space keeper (dsk): free-space monitor and retention engine for
//! network-attached HDHomeRun DVR storage.
//!
//! Two kinds of maintenance run against every device:
//! 1. **Space maintenance**: when free space drops below the configured
//!    minimum, delete the best candidate and check again on an interval
//!    derived from the headroom and the device's worst-case ingest rate
//! 2. **Retention**: enforce per-series episode limits and maximum ages
//!    across all devices
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use dvr_space_keeper::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use dvr_space_keeper::core::config::Config;
//! use dvr_space_keeper::policy::{DeletePolicy, DeletePolicyEngine};
//! ```

pub mod prelude;

pub mod catalog;
pub mod core;
pub mod daemon;
pub mod device;
pub mod logger;
pub mod maintenance;
pub mod policy;
pub mod report;
