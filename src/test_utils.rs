//! Fakes shared by the unit tests

use crate::errors::{OverkillError, Result};
use crate::service::ServiceManager;
use crate::thermal::{CoolingDevice, ThermalController, ThermalZone};
use crate::vcgencmd::VendorQuery;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Canned firmware responses keyed by the space-joined query arguments.
/// Unknown queries fail like a missing `vcgencmd` would.
#[derive(Debug, Default, Clone)]
pub struct FakeQuery {
    responses: HashMap<String, String>,
}

impl FakeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, response: &str) -> Self {
        self.responses.insert(query.to_string(), response.to_string());
        self
    }
}

#[async_trait]
impl VendorQuery for FakeQuery {
    async fn query(&self, args: &[&str]) -> Result<String> {
        let key = args.join(" ");
        self.responses
            .get(&key)
            .cloned()
            .ok_or_else(|| OverkillError::CommandFailed {
                command: format!("vcgencmd {}", key),
                reason: "not available".to_string(),
            })
    }
}

/// Temporary sysfs-like tree with a thermal zone and a cooling device
pub struct FakeBoard {
    dir: TempDir,
}

impl FakeBoard {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("cooling_device0")).unwrap();
        Self { dir }
    }

    pub fn zone_path(&self) -> PathBuf {
        self.dir.path().join("thermal_zone0_temp")
    }

    pub fn cooling_dir(&self) -> PathBuf {
        self.dir.path().join("cooling_device0")
    }

    pub fn set_zone_millidegrees(&self, value: i32) {
        fs::write(self.zone_path(), format!("{}\n", value)).unwrap();
    }

    pub fn set_fan(&self, current: u32, maximum: u32) {
        fs::write(self.cooling_dir().join("cur_state"), format!("{}\n", current)).unwrap();
        fs::write(self.cooling_dir().join("max_state"), format!("{}\n", maximum)).unwrap();
    }

    pub fn fan_state(&self) -> u32 {
        fs::read_to_string(self.cooling_dir().join("cur_state"))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    pub fn controller(&self, query: FakeQuery) -> ThermalController {
        ThermalController::new(
            Arc::new(query),
            ThermalZone::new(self.zone_path()),
            CoolingDevice::new(self.cooling_dir()),
        )
    }
}

/// Records every call made to the service manager
#[derive(Debug, Default, Clone)]
pub struct FakeServiceManager {
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeServiceManager {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for FakeServiceManager {
    async fn reload(&self) -> Result<()> {
        self.push("reload".to_string())
    }

    async fn enable(&self, unit: &str) -> Result<()> {
        self.push(format!("enable {}", unit))
    }

    async fn disable(&self, unit: &str) -> Result<()> {
        self.push(format!("disable {}", unit))
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.push(format!("restart {}", unit))
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        self.push(format!("stop {}", unit))
    }
}
