//! Overclock profiles and the store that holds them

use crate::errors::{OverkillError, Result};
use crate::persist;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

pub const ARM_FREQ_RANGE: RangeInclusive<i32> = 600..=3000;
pub const GPU_FREQ_RANGE: RangeInclusive<i32> = 300..=1100;
pub const OVER_VOLTAGE_RANGE: RangeInclusive<i32> = -16..=8;
pub const OVER_VOLTAGE_DELTA_RANGE: RangeInclusive<i32> = 0..=100_000;

/// A named set of frequency and voltage targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverclockProfile {
    pub name: String,
    /// ARM core clock in MHz
    pub arm_freq: i32,
    /// GPU core clock in MHz
    pub gpu_freq: i32,
    pub over_voltage: i32,
    /// Voltage offset in µV
    #[serde(default)]
    pub over_voltage_delta: i32,
    #[serde(default)]
    pub description: String,
}

fn check_range(field: &'static str, value: i32, range: &RangeInclusive<i32>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(OverkillError::InvalidRange {
            field,
            value: value.into(),
            min: (*range.start()).into(),
            max: (*range.end()).into(),
        })
    }
}

impl OverclockProfile {
    pub fn new(
        name: impl Into<String>,
        arm_freq: i32,
        gpu_freq: i32,
        over_voltage: i32,
        over_voltage_delta: i32,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            arm_freq,
            gpu_freq,
            over_voltage,
            over_voltage_delta,
            description: description.into(),
        }
    }

    /// Check every numeric field against its allowed range; the first
    /// offending field is reported.
    pub fn validate(&self) -> Result<()> {
        check_range("arm_freq", self.arm_freq, &ARM_FREQ_RANGE)?;
        check_range("gpu_freq", self.gpu_freq, &GPU_FREQ_RANGE)?;
        check_range("over_voltage", self.over_voltage, &OVER_VOLTAGE_RANGE)?;
        check_range(
            "over_voltage_delta",
            self.over_voltage_delta,
            &OVER_VOLTAGE_DELTA_RANGE,
        )?;
        Ok(())
    }

    pub fn safe() -> Self {
        Self::new("safe", 2400, 900, 2, 0, "Conservative settings for stability")
    }

    pub fn balanced() -> Self {
        Self::new(
            "balanced",
            2600,
            950,
            3,
            0,
            "Good performance with reasonable temps",
        )
    }

    pub fn performance() -> Self {
        Self::new(
            "performance",
            2700,
            975,
            4,
            0,
            "High performance, requires good cooling",
        )
    }

    pub fn extreme() -> Self {
        Self::new(
            "extreme",
            2800,
            1000,
            5,
            50_000,
            "Maximum performance, excellent cooling required",
        )
    }

    /// Built-in profiles, ordered from least to most aggressive
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::safe(),
            Self::balanced(),
            Self::performance(),
            Self::extreme(),
        ]
    }
}

/// Kind of cooling fitted to the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CoolingType {
    None,
    Passive,
    ActiveSmall,
    ActiveMedium,
    ActiveLarge,
    Water,
}

impl CoolingType {
    /// Name of the most aggressive built-in profile this cooling can carry
    pub fn recommended_profile(self) -> &'static str {
        match self {
            CoolingType::None | CoolingType::Passive => "safe",
            CoolingType::ActiveSmall => "balanced",
            CoolingType::ActiveMedium => "performance",
            CoolingType::ActiveLarge | CoolingType::Water => "extreme",
        }
    }
}

/// Ordered collection of validated profiles, optionally backed by a JSON file
#[derive(Debug)]
pub struct ProfileStore {
    profiles: Vec<OverclockProfile>,
    path: Option<PathBuf>,
}

impl ProfileStore {
    /// Store holding only the built-in profiles, never written to disk
    pub fn in_memory() -> Self {
        Self {
            profiles: OverclockProfile::defaults(),
            path: None,
        }
    }

    /// Load the store from `path`.
    ///
    /// A missing or unreadable file, or one holding invalid profiles, falls
    /// back to the built-in defaults.
    pub fn load(path: &Path) -> Self {
        let profiles = match Self::read_profiles(path) {
            Ok(Some(profiles)) => profiles,
            Ok(None) => {
                info!(
                    "No profile file at {}, using built-in profiles",
                    path.display()
                );
                OverclockProfile::defaults()
            }
            Err(e) => {
                warn!(
                    "Ignoring profile file {}: {}; using built-in profiles",
                    path.display(),
                    e
                );
                OverclockProfile::defaults()
            }
        };

        Self {
            profiles,
            path: Some(path.to_path_buf()),
        }
    }

    fn read_profiles(path: &Path) -> Result<Option<Vec<OverclockProfile>>> {
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(path)?;
        let profiles: Vec<OverclockProfile> = serde_json::from_str(&json)?;
        if profiles.is_empty() {
            return Err(OverkillError::Config("profile file is empty".to_string()));
        }
        for profile in &profiles {
            profile.validate()?;
        }
        Ok(Some(profiles))
    }

    pub fn get(&self, name: &str) -> Option<&OverclockProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Resolve a profile by name or fail with [`OverkillError::ProfileNotFound`]
    pub fn require(&self, name: &str) -> Result<&OverclockProfile> {
        self.get(name).ok_or_else(|| OverkillError::ProfileNotFound {
            name: name.to_string(),
        })
    }

    /// All profiles in insertion order
    pub fn all(&self) -> &[OverclockProfile] {
        &self.profiles
    }

    /// Validate `profile`, then insert it or replace the profile of the same
    /// name in place. Backed stores are saved immediately.
    pub fn add_or_replace(&mut self, profile: OverclockProfile) -> Result<()> {
        profile.validate()?;

        match self.profiles.iter_mut().find(|p| p.name == profile.name) {
            Some(existing) => *existing = profile,
            None => self.profiles.push(profile),
        }

        self.save()
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.profiles)?;
        persist::atomic_write(path, &json)?;
        info!("Saved {} profiles to {}", self.profiles.len(), path.display());
        Ok(())
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
