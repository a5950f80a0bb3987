//! Application settings: where the boot config, sensors and daemon live

use crate::errors::{OverkillError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative settings file
pub const CONFIG_ENV: &str = "OVERKILL_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "/etc/overkill/config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub boot_config: PathBuf,
    pub armbian_env: PathBuf,
    pub profiles_file: PathBuf,
    pub thermal_zone: PathBuf,
    pub cooling_device: PathBuf,
    pub vcgencmd: String,
    pub query_timeout_ms: u64,
    pub daemon_payload: PathBuf,
    pub unit_dir: PathBuf,
    pub daemon_binary: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            boot_config: PathBuf::from("/boot/firmware/config.txt"),
            armbian_env: PathBuf::from("/boot/armbianEnv.txt"),
            profiles_file: PathBuf::from("/etc/overkill/profiles.json"),
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            cooling_device: PathBuf::from("/sys/class/thermal/cooling_device0"),
            vcgencmd: "vcgencmd".to_string(),
            query_timeout_ms: 2000,
            daemon_payload: PathBuf::from("/etc/overkill/fancontrol.json"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            daemon_binary: PathBuf::from("/usr/local/bin/overkill"),
        }
    }
}

impl Settings {
    /// Settings file to use: the explicit path, then `$OVERKILL_CONFIG`, then
    /// the system default
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load settings; a missing file yields the defaults, a malformed one is
    /// an error
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| {
            OverkillError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
