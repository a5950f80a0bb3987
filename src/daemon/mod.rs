//! Fan control daemon: the frozen payload it runs from, its installation as a
//! systemd service and the polling loop itself.

use crate::{
    config::Settings,
    errors::{OverkillError, Result},
    fan::FanCurve,
    persist,
    service::{ServiceManager, ServiceUnit},
    thermal::{CoolingDevice, ThermalController, ThermalZone},
    vcgencmd::Vcgencmd,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{sleep, Duration};

pub const SERVICE_NAME: &str = "overkill-thermal";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Seconds between routine status lines in the journal
const STATUS_LOG_SECS: u64 = 30;

/// Everything the daemon needs, captured when it is installed.
///
/// The curve is a snapshot: the daemon never consults the profile store, so a
/// new curve only takes effect after the payload is regenerated and the
/// service reinstalled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonPayload {
    /// Overclock profile the curve was chosen for, if any
    pub profile: Option<String>,
    pub curve: FanCurve,
    pub poll_interval_secs: u64,
    pub thermal_zone: PathBuf,
    pub cooling_device: PathBuf,
    pub vcgencmd: String,
    pub query_timeout_ms: u64,
    pub generated_at: String,
}

impl DaemonPayload {
    pub fn new(curve: FanCurve, profile: Option<String>, settings: &Settings) -> Self {
        Self {
            profile,
            curve,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            thermal_zone: settings.thermal_zone.clone(),
            cooling_device: settings.cooling_device.clone(),
            vcgencmd: settings.vcgencmd.clone(),
            query_timeout_ms: settings.query_timeout_ms,
            generated_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let payload: DaemonPayload = serde_json::from_str(&json)?;
        if payload.poll_interval_secs == 0 {
            return Err(OverkillError::Config(
                "poll interval must be at least one second".to_string(),
            ));
        }
        Ok(payload)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Rendered files making up an installed daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonArtifact {
    pub payload: String,
    pub unit: String,
}

/// Writes the daemon's payload and unit file and registers the service
pub struct DaemonInstaller<S: ServiceManager> {
    payload_path: PathBuf,
    unit_dir: PathBuf,
    binary: PathBuf,
    service: S,
}

impl<S: ServiceManager> DaemonInstaller<S> {
    pub fn new(settings: &Settings, service: S) -> Self {
        Self {
            payload_path: settings.daemon_payload.clone(),
            unit_dir: settings.unit_dir.clone(),
            binary: settings.daemon_binary.clone(),
            service,
        }
    }

    pub fn unit_name() -> String {
        format!("{}.service", SERVICE_NAME)
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(Self::unit_name())
    }

    /// Render the payload and unit file without touching the system
    pub fn generate(&self, payload: &DaemonPayload) -> Result<DaemonArtifact> {
        let unit = ServiceUnit {
            description: "OVERKILL Intelligent Thermal Management".to_string(),
            exec_start: format!(
                "{} thermal daemon --payload {}",
                self.binary.display(),
                self.payload_path.display()
            ),
            restart: "always".to_string(),
            restart_sec: 5,
        };

        Ok(DaemonArtifact {
            payload: payload.to_json()?,
            unit: unit.render(),
        })
    }

    /// Write both files, then reload, enable and (re)start the service so a
    /// running daemon picks up the new payload.
    pub async fn install(&self, payload: &DaemonPayload) -> Result<DaemonArtifact> {
        let artifact = self.generate(payload)?;

        if let Some(dir) = self.payload_path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::create_dir_all(&self.unit_dir)?;

        persist::atomic_write(&self.payload_path, &artifact.payload)?;
        persist::atomic_write(&self.unit_path(), &artifact.unit)?;

        let unit = Self::unit_name();
        self.service.reload().await?;
        self.service.enable(&unit).await?;
        self.service.restart(&unit).await?;

        info!(
            "Fan control service installed with {} curve points",
            payload.curve.points().len()
        );
        Ok(artifact)
    }

    /// Stop and disable the service and delete its files
    pub async fn uninstall(&self) -> Result<()> {
        let unit = Self::unit_name();
        if let Err(e) = self.service.stop(&unit).await {
            warn!("Failed to stop {}: {}", unit, e);
        }
        if let Err(e) = self.service.disable(&unit).await {
            warn!("Failed to disable {}: {}", unit, e);
        }

        for path in [self.unit_path(), self.payload_path.clone()] {
            match fs::remove_file(&path) {
                Ok(()) => info!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.service.reload().await?;
        info!("Fan control service uninstalled");
        Ok(())
    }
}

/// What one poll iteration did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Applied { temperature: f32, speed: u8 },
    /// No temperature source answered; the fan keeps its previous state
    ReadFailed,
    WriteFailed { temperature: f32, speed: u8 },
}

/// Single-threaded control loop driving the fan from the curve
pub struct FanDaemon {
    controller: ThermalController,
    curve: FanCurve,
    interval: Duration,
    ticks: u64,
}

impl FanDaemon {
    pub fn new(controller: ThermalController, curve: FanCurve, interval: Duration) -> Self {
        Self {
            controller,
            curve,
            interval,
            ticks: 0,
        }
    }

    /// Build the daemon from an installed payload
    pub fn from_payload(payload: DaemonPayload) -> Self {
        let interval = payload.poll_interval();
        let query = Vcgencmd::new(
            payload.vcgencmd,
            Duration::from_millis(payload.query_timeout_ms),
        );
        let controller = ThermalController::new(
            Arc::new(query),
            ThermalZone::new(payload.thermal_zone),
            CoolingDevice::new(payload.cooling_device),
        );
        Self::new(controller, payload.curve, interval)
    }

    fn status_due(&self) -> bool {
        let every = (STATUS_LOG_SECS / self.interval.as_secs().max(1)).max(1);
        self.ticks % every == 0
    }

    /// Read the temperature, evaluate the curve and write the fan state once
    pub async fn tick(&mut self) -> TickOutcome {
        let status_due = self.status_due();
        self.ticks += 1;

        let temperature = match self.controller.temperature().await {
            Ok(t) => t,
            Err(e) => {
                warn!("Skipping fan update: {}", e);
                return TickOutcome::ReadFailed;
            }
        };

        let speed = self.curve.speed_for(temperature);
        if let Err(e) = self.controller.set_fan_speed(speed) {
            error!("Failed to set fan speed to {}%: {}", speed, e);
            return TickOutcome::WriteFailed { temperature, speed };
        }

        if status_due {
            info!("Temp: {:.1}°C, Fan: {}%", temperature, speed);
        } else {
            debug!("Temp: {:.1}°C, Fan: {}%", temperature, speed);
        }
        TickOutcome::Applied { temperature, speed }
    }

    /// Poll until SIGTERM or SIGINT
    pub async fn run(mut self) -> Result<()> {
        info!(
            "OVERKILL fan control started ({} curve points, every {}s)",
            self.curve.points().len(),
            self.interval.as_secs()
        );

        let mut terminate = signal(SignalKind::terminate())?;

        loop {
            self.tick().await;

            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = terminate.recv() => {
                    info!("Received SIGTERM, stopping fan control");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping fan control");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fan::FanPoint;
    use crate::test_utils::{FakeBoard, FakeQuery, FakeServiceManager};
    use tempfile::TempDir;

    fn settings_in(dir: &TempDir) -> Settings {
        Settings {
            daemon_payload: dir.path().join("etc/overkill/fancontrol.json"),
            unit_dir: dir.path().join("systemd"),
            daemon_binary: PathBuf::from("/usr/local/bin/overkill"),
            ..Settings::default()
        }
    }

    #[test]
    fn test_generate_embeds_curve_and_restart_policy() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let installer = DaemonInstaller::new(&settings, FakeServiceManager::default());
        let payload = DaemonPayload::new(FanCurve::extreme(), Some("extreme".into()), &settings);

        let artifact = installer.generate(&payload).unwrap();
        let decoded: DaemonPayload = serde_json::from_str(&artifact.payload).unwrap();
        assert_eq!(decoded.curve, FanCurve::extreme());
        assert_eq!(decoded.poll_interval_secs, 5);

        assert!(artifact.unit.contains("\nRestart=always\n"));
        assert!(artifact.unit.contains(&format!(
            "ExecStart=/usr/local/bin/overkill thermal daemon --payload {}",
            settings.daemon_payload.display()
        )));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_install_writes_files_and_starts_service() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let service = FakeServiceManager::default();
        let installer = DaemonInstaller::new(&settings, service.clone());

        let payload = DaemonPayload::new(FanCurve::standard(), None, &settings);
        installer.install(&payload).await.unwrap();

        let stored = DaemonPayload::load(&settings.daemon_payload).unwrap();
        assert_eq!(stored.curve, FanCurve::standard());
        assert!(installer.unit_path().exists());
        assert_eq!(
            service.calls(),
            [
                "reload",
                "enable overkill-thermal.service",
                "restart overkill-thermal.service"
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_reinstall_replaces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let installer = DaemonInstaller::new(&settings, FakeServiceManager::default());

        installer
            .install(&DaemonPayload::new(FanCurve::safe(), Some("safe".into()), &settings))
            .await
            .unwrap();
        installer
            .install(&DaemonPayload::new(
                FanCurve::extreme(),
                Some("extreme".into()),
                &settings,
            ))
            .await
            .unwrap();

        let stored = DaemonPayload::load(&settings.daemon_payload).unwrap();
        assert_eq!(stored.profile.as_deref(), Some("extreme"));
        assert_eq!(stored.curve, FanCurve::extreme());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_uninstall_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let service = FakeServiceManager::default();
        let installer = DaemonInstaller::new(&settings, service.clone());

        installer
            .install(&DaemonPayload::new(FanCurve::standard(), None, &settings))
            .await
            .unwrap();
        installer.uninstall().await.unwrap();

        assert!(!installer.unit_path().exists());
        assert!(!settings.daemon_payload.exists());
        assert!(service.calls().ends_with(&[
            "stop overkill-thermal.service".to_string(),
            "disable overkill-thermal.service".to_string(),
            "reload".to_string(),
        ]));
    }

    #[test]
    fn test_zero_interval_payload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let mut payload = DaemonPayload::new(FanCurve::standard(), None, &settings);
        payload.poll_interval_secs = 0;

        let path = dir.path().join("payload.json");
        fs::write(&path, payload.to_json().unwrap()).unwrap();
        assert!(matches!(DaemonPayload::load(&path), Err(OverkillError::Config(_))));
    }

    #[tokio::test]
    async fn test_tick_drives_fan_from_curve() {
        let board = FakeBoard::new();
        board.set_zone_millidegrees(45_000);
        board.set_fan(0, 4);

        let mut daemon = FanDaemon::new(
            board.controller(FakeQuery::new()),
            FanCurve::standard(),
            Duration::from_secs(5),
        );
        assert_eq!(
            daemon.tick().await,
            TickOutcome::Applied {
                temperature: 45.0,
                speed: 15
            }
        );
        assert_eq!(board.fan_state(), 1);

        board.set_zone_millidegrees(85_000);
        daemon.tick().await;
        assert_eq!(board.fan_state(), 4);
    }

    #[tokio::test]
    async fn test_tick_keeps_state_when_sensor_fails() {
        let board = FakeBoard::new();
        board.set_fan(3, 4);

        let curve = FanCurve::new(vec![FanPoint::new(40, 0), FanPoint::new(80, 100)]).unwrap();
        let mut daemon = FanDaemon::new(
            board.controller(FakeQuery::new()),
            curve,
            Duration::from_secs(5),
        );

        assert_eq!(daemon.tick().await, TickOutcome::ReadFailed);
        assert_eq!(board.fan_state(), 3);
    }

    #[tokio::test]
    async fn test_tick_reports_driver_failure() {
        let board = FakeBoard::new();
        board.set_zone_millidegrees(60_000);

        let mut daemon = FanDaemon::new(
            board.controller(FakeQuery::new()),
            FanCurve::standard(),
            Duration::from_secs(5),
        );
        assert_eq!(
            daemon.tick().await,
            TickOutcome::WriteFailed {
                temperature: 60.0,
                speed: 50
            }
        );
    }
}
