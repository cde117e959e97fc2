//! Core infrastructure: configuration, settings resolution, errors, units.

pub mod config;
pub mod errors;
pub mod settings;
pub mod units;
