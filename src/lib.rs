//! OVERKILL overclock and thermal control
//!
//! Manages overclock profiles persisted in the firmware boot configuration and
//! a fan control service driven by a temperature curve.

pub mod args;
pub mod boot_config;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod fan;
pub mod logging;
pub mod overclock;
pub mod persist;
pub mod profile;
pub mod service;
pub mod thermal;
pub mod vcgencmd;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use errors::{OverkillError, Result};
pub use fan::{FanCurve, FanPoint};
pub use overclock::{OverclockManager, OverclockOutcome, OverclockState};
pub use profile::{OverclockProfile, ProfileStore};
pub use thermal::{ThermalController, ThermalReading, ThrottleStatus};
