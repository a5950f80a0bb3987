//! Temperature, fan and throttle state of the board

use crate::errors::{OverkillError, Result};
use crate::vcgencmd::VendorQuery;
use log::{debug, warn};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of readings kept in the history
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalReading {
    pub temperature: f32,
    /// `None` when the fan device could not be read
    pub fan_speed: Option<u8>,
    pub timestamp: Instant,
}

/// Decoded firmware throttle bitmask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ThrottleStatus {
    pub throttled: bool,
    pub temperature_limit: bool,
    pub undervoltage: bool,
    pub frequency_capped: bool,
}

impl ThrottleStatus {
    const UNDERVOLTAGE: u32 = 1 << 0;
    const FREQUENCY_CAPPED: u32 = 1 << 1;
    const THROTTLED: u32 = 1 << 2;
    const TEMPERATURE_LIMIT: u32 = 1 << 3;

    /// Decode the "currently active" bits; sticky history bits are ignored.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            undervoltage: bits & Self::UNDERVOLTAGE != 0,
            frequency_capped: bits & Self::FREQUENCY_CAPPED != 0,
            throttled: bits & Self::THROTTLED != 0,
            temperature_limit: bits & Self::TEMPERATURE_LIMIT != 0,
        }
    }

    pub fn any(&self) -> bool {
        self.throttled || self.temperature_limit || self.undervoltage || self.frequency_capped
    }
}

/// Map a driver state to a percentage: `round(current / maximum * 100)`
pub fn state_to_percent(current: u32, maximum: u32) -> Option<u8> {
    if maximum == 0 {
        return None;
    }
    let current = current.min(maximum);
    Some((f64::from(current) / f64::from(maximum) * 100.0).round() as u8)
}

/// Map a percentage to a driver state: `round(percent / 100 * maximum)`,
/// clamped to `[0, maximum]`
pub fn percent_to_state(percent: u8, maximum: u32) -> u32 {
    let state = (f64::from(percent) / 100.0 * f64::from(maximum)).round() as u32;
    state.min(maximum)
}

/// Millidegree sensor file such as `/sys/class/thermal/thermal_zone0/temp`
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_celsius(&self) -> Result<f32> {
        let content = fs::read_to_string(&self.path)?;
        let millidegrees: i32 = content.trim().parse().map_err(|_| {
            OverkillError::SensorUnavailable(format!(
                "unparsable value {:?} in {}",
                content.trim(),
                self.path.display()
            ))
        })?;
        Ok(millidegrees as f32 / 1000.0)
    }
}

/// Thermal cooling device exposing `cur_state` and `max_state`
#[derive(Debug, Clone)]
pub struct CoolingDevice {
    dir: PathBuf,
}

impl CoolingDevice {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_state(&self, file: &str) -> Result<u32> {
        let path = self.dir.join(file);
        let content = fs::read_to_string(&path).map_err(|e| OverkillError::driver(&path, e))?;
        content.trim().parse().map_err(|_| {
            OverkillError::driver(&path, format!("unparsable state {:?}", content.trim()))
        })
    }

    pub fn max_state(&self) -> Result<u32> {
        self.read_state("max_state")
    }

    pub fn cur_state(&self) -> Result<u32> {
        self.read_state("cur_state")
    }

    /// Current speed in percent
    pub fn speed(&self) -> Result<u8> {
        let maximum = self.max_state()?;
        let current = self.cur_state()?;
        state_to_percent(current, maximum)
            .ok_or_else(|| OverkillError::driver(self.dir.join("max_state"), "maximum state is 0"))
    }

    /// Set the speed in percent; returns the driver state written
    pub fn set_speed(&self, percent: u8) -> Result<u32> {
        if percent > 100 {
            return Err(OverkillError::InvalidRange {
                field: "fan_speed",
                value: percent.into(),
                min: 0,
                max: 100,
            });
        }

        let maximum = self.max_state()?;
        let state = percent_to_state(percent, maximum);
        let path = self.dir.join("cur_state");
        fs::write(&path, state.to_string()).map_err(|e| OverkillError::driver(&path, e))?;

        debug!("Set fan speed to {}% (state {}/{})", percent, state, maximum);
        Ok(state)
    }
}

/// Reads board temperature, fan and throttle state and keeps a short history
pub struct ThermalController {
    query: Arc<dyn VendorQuery>,
    zone: ThermalZone,
    fan: CoolingDevice,
    history: VecDeque<ThermalReading>,
}

impl ThermalController {
    pub fn new(query: Arc<dyn VendorQuery>, zone: ThermalZone, fan: CoolingDevice) -> Self {
        Self {
            query,
            zone,
            fan,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Current SoC temperature.
    ///
    /// The firmware query is tried first, then the sensor file. When neither
    /// answers the result is [`OverkillError::SensorUnavailable`]; no default
    /// temperature is substituted.
    pub async fn temperature(&self) -> Result<f32> {
        match self.query.measure_temp().await {
            Ok(temp) => return Ok(temp),
            Err(e) => debug!("Firmware temperature query failed: {}", e),
        }

        self.zone.read_celsius().map_err(|e| {
            OverkillError::SensorUnavailable(format!(
                "no temperature source responded ({}: {})",
                self.zone.path().display(),
                e
            ))
        })
    }

    pub fn fan_speed(&self) -> Result<u8> {
        self.fan.speed()
    }

    pub fn set_fan_speed(&self, percent: u8) -> Result<u32> {
        self.fan.set_speed(percent)
    }

    pub async fn throttle_status(&self) -> Result<ThrottleStatus> {
        let bits = self.query.get_throttled().await.map_err(|e| {
            OverkillError::SensorUnavailable(format!("throttle query failed: {}", e))
        })?;
        Ok(ThrottleStatus::from_bits(bits))
    }

    /// Take a reading and append it to the history
    pub async fn record(&mut self) -> Result<ThermalReading> {
        let temperature = self.temperature().await?;
        let fan_speed = match self.fan.speed() {
            Ok(speed) => Some(speed),
            Err(e) => {
                warn!("Fan speed unavailable: {}", e);
                None
            }
        };

        let reading = ThermalReading {
            temperature,
            fan_speed,
            timestamp: Instant::now(),
        };
        self.push(reading);
        Ok(reading)
    }

    fn push(&mut self, reading: ThermalReading) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(reading);
    }

    pub fn history(&self) -> impl Iterator<Item = &ThermalReading> {
        self.history.iter()
    }

    /// Mean temperature of readings taken within the last `window`, or an
    /// instantaneous reading when none qualify
    pub async fn average(&self, window: Duration) -> Result<f32> {
        let now = Instant::now();
        let recent: Vec<f32> = self
            .history
            .iter()
            .filter(|r| now.saturating_duration_since(r.timestamp) < window)
            .map(|r| r.temperature)
            .collect();

        if recent.is_empty() {
            return self.temperature().await;
        }
        Ok(recent.iter().sum::<f32>() / recent.len() as f32)
    }
}
