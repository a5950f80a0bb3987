//! Applying and removing overclock profiles in the boot configuration

use crate::boot_config::{BootConfigDocument, ClockSettings, PersistedSettings};
use crate::errors::{OverkillError, Result};
use crate::persist::{self, WriterLock};
use crate::profile::OverclockProfile;
use crate::thermal::ThermalController;
use crate::vcgencmd::{self, VendorQuery};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const ARMBIAN_MARKER: &str = "# OVERKILL ARMBIAN CONFIGURATION";
const ARMBIAN_BLOCK: &str = "extraargs=cma=512M coherent_pool=2M";

/// Highest temperature a stability run may end at
pub const STABILITY_MAX_TEMP: f32 = 85.0;

/// Result of a successful apply or remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverclockOutcome {
    pub message: String,
    /// Clock and voltage changes only take effect at the next boot
    pub reboot_required: bool,
    /// Snapshot taken before the file was touched
    pub backup: Option<PathBuf>,
    /// False when the file already had the requested content
    pub changed: bool,
}

/// How the persisted configuration relates to what the SoC runs right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverclockState {
    /// No managed section and the hardware runs at its defaults
    NoOverclock,
    /// Persisted settings differ from the live ones; `None` means the managed
    /// section is gone but the old clocks are still active
    PendingReboot(Option<String>),
    /// The managed section is what the hardware runs
    Active(String),
}

/// Owner of the managed section in the boot configuration
pub struct OverclockManager {
    boot_config: PathBuf,
    armbian_env: Option<PathBuf>,
    query: Arc<dyn VendorQuery>,
}

impl OverclockManager {
    pub fn new(boot_config: impl Into<PathBuf>, query: Arc<dyn VendorQuery>) -> Self {
        Self {
            boot_config: boot_config.into(),
            armbian_env: None,
            query,
        }
    }

    /// Also keep the Armbian environment file prepared when it exists
    pub fn with_armbian_env(mut self, path: impl Into<PathBuf>) -> Self {
        self.armbian_env = Some(path.into());
        self
    }

    pub fn boot_config(&self) -> &Path {
        &self.boot_config
    }

    /// Range-check a profile; performs no I/O
    pub fn validate(&self, profile: &OverclockProfile) -> Result<()> {
        profile.validate()
    }

    /// Persist `profile` into the managed section.
    ///
    /// Nothing is written unless the profile is valid and a backup of the
    /// current file exists.
    pub fn apply(&self, profile: &OverclockProfile) -> Result<OverclockOutcome> {
        self.validate(profile)?;

        let _lock = WriterLock::acquire(&self.boot_config)?;
        let backup = persist::backup_file(&self.boot_config)?;

        let content = fs::read_to_string(&self.boot_config)?;
        let mut doc = BootConfigDocument::parse(&content);
        doc.apply_profile(profile);

        let changed = self.write_if_changed(&content, &doc)?;
        self.prepare_armbian_env();

        info!("Applied overclock profile: {}", profile.name);
        Ok(OverclockOutcome {
            message: format!("Applied {} profile. Reboot required.", profile.name),
            reboot_required: true,
            backup: Some(backup),
            changed,
        })
    }

    /// Delete the managed section. A file without one is left as is.
    pub fn remove(&self) -> Result<OverclockOutcome> {
        let _lock = WriterLock::acquire(&self.boot_config)?;
        let backup = persist::backup_file(&self.boot_config)?;

        let content = fs::read_to_string(&self.boot_config)?;
        let mut doc = BootConfigDocument::parse(&content);

        if !doc.remove_section() {
            info!("No overclock section in {}", self.boot_config.display());
            return Ok(OverclockOutcome {
                message: "No overclock settings to remove.".to_string(),
                reboot_required: false,
                backup: Some(backup),
                changed: false,
            });
        }

        let changed = self.write_if_changed(&content, &doc)?;
        info!("Removed overclock settings from {}", self.boot_config.display());
        Ok(OverclockOutcome {
            message: "Overclock settings removed. Reboot required.".to_string(),
            reboot_required: true,
            backup: Some(backup),
            changed,
        })
    }

    fn write_if_changed(&self, original: &str, doc: &BootConfigDocument) -> Result<bool> {
        let rendered = doc.render();
        if rendered == original {
            debug!("{} already up to date", self.boot_config.display());
            return Ok(false);
        }
        persist::atomic_write(&self.boot_config, &rendered)?;
        Ok(true)
    }

    fn prepare_armbian_env(&self) {
        let Some(path) = self.armbian_env.as_deref().filter(|p| p.exists()) else {
            return;
        };

        let result = fs::read_to_string(path)
            .map_err(OverkillError::from)
            .and_then(|content| {
                if content.contains(ARMBIAN_MARKER) {
                    return Ok(());
                }
                let mut updated = content;
                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(&format!("\n{}\n{}\n", ARMBIAN_MARKER, ARMBIAN_BLOCK));
                persist::atomic_write(path, &updated)
            });

        if let Err(e) = result {
            warn!("Failed to update Armbian env {}: {}", path.display(), e);
        }
    }

    /// Settings that will be active after the next boot
    pub fn persisted_settings(&self) -> Result<Option<PersistedSettings>> {
        let content = fs::read_to_string(&self.boot_config)?;
        Ok(BootConfigDocument::parse(&content).persisted_settings())
    }

    /// Settings the firmware is running with right now
    pub async fn live_settings(&self) -> Result<ClockSettings> {
        let required = |e: OverkillError| {
            OverkillError::SensorUnavailable(format!("live clock query failed: {}", e))
        };
        let arm_freq = self.query.get_config("arm_freq").await.map_err(required)?;
        let gpu_freq = self.query.get_config("gpu_freq").await.map_err(required)?;

        let defaults = ClockSettings::HARDWARE_DEFAULT;
        let over_voltage = self.optional_config("over_voltage", defaults.over_voltage).await;
        let over_voltage_delta = self
            .optional_config("over_voltage_delta", defaults.over_voltage_delta)
            .await;

        Ok(ClockSettings {
            arm_freq,
            gpu_freq,
            over_voltage,
            over_voltage_delta,
        })
    }

    async fn optional_config(&self, key: &str, default: i32) -> i32 {
        match self.query.get_config(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!("{} not reported ({}), assuming {}", key, e, default);
                default
            }
        }
    }

    /// Compare persisted and live settings
    pub async fn state(&self) -> Result<OverclockState> {
        let persisted = self.persisted_settings()?;
        let live = self.live_settings().await?;
        Ok(reconcile(persisted, live))
    }
}

/// Combine the persisted view and the live view into one state
pub fn reconcile(persisted: Option<PersistedSettings>, live: ClockSettings) -> OverclockState {
    match persisted {
        None if live == ClockSettings::HARDWARE_DEFAULT => OverclockState::NoOverclock,
        None => OverclockState::PendingReboot(None),
        Some(p) if p.settings == live => {
            OverclockState::Active(p.profile.unwrap_or_else(|| "custom".to_string()))
        }
        Some(p) => {
            OverclockState::PendingReboot(Some(p.profile.unwrap_or_else(|| "custom".to_string())))
        }
    }
}

/// Outcome of a stress run
#[derive(Debug, Clone, PartialEq)]
pub struct StabilityReport {
    pub passed: bool,
    pub temperature: Option<f32>,
    pub message: String,
}

/// Load every core with `stress-ng` for `duration`, then check that the board
/// neither failed verification nor ran hotter than [`STABILITY_MAX_TEMP`].
pub async fn stability_test(
    thermal: &ThermalController,
    duration: Duration,
) -> Result<StabilityReport> {
    info!("Running stability test for {} seconds...", duration.as_secs());

    let timeout_arg = format!("{}s", duration.as_secs());
    let run = vcgencmd::run_command(
        "stress-ng",
        &[
            "--cpu",
            "0",
            "--cpu-method",
            "all",
            "--verify",
            "--metrics",
            "--timeout",
            &timeout_arg,
        ],
        duration + Duration::from_secs(10),
    )
    .await;

    if let Err(e) = run {
        return Ok(StabilityReport {
            passed: false,
            temperature: None,
            message: format!("Stability test failed: {}", e),
        });
    }

    let temperature = thermal.temperature().await?;
    if temperature > STABILITY_MAX_TEMP {
        return Ok(StabilityReport {
            passed: false,
            temperature: Some(temperature),
            message: format!("Temperature too high during test: {:.1}°C", temperature),
        });
    }

    Ok(StabilityReport {
        passed: true,
        temperature: Some(temperature),
        message: format!("Stability test passed. Final temp: {:.1}°C", temperature),
    })
}
