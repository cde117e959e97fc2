//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use dvr_space_keeper::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DskError, Result};
pub use crate::core::settings::{
    CliOverrides, DeviceSettings, EffectiveSettings, FreeSpaceThreshold, RerecordPolicy,
    SettingsResolver,
};

// Devices
pub use crate::device::http::HttpGateway;
pub use crate::device::mock::MockGateway;
pub use crate::device::{Device, DeviceGateway, StorageStats};

// Catalog and policy
pub use crate::catalog::{Category, Recording, RecordingCatalog};
pub use crate::policy::{CandidateOrder, DeletePolicy, DeletePolicyEngine};

// Maintenance
pub use crate::maintenance::{
    DeleteGate, DeleteReason, RecordingRemover, RetentionSweeper, SpaceMaintainer,
    adaptive_interval,
};
pub use crate::report::{ReportScheduler, SpaceReport};

// Logging
pub use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
