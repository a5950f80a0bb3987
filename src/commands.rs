//! Command dispatch for the overkill CLI

use crate::{
    args::{Args, Commands, OverclockCommands, ProfileCommands, ThermalCommands},
    config::Settings,
    daemon::{DaemonInstaller, DaemonPayload, FanDaemon},
    errors::Result,
    fan::FanCurve,
    overclock::{self, OverclockManager, OverclockState},
    profile::{CoolingType, OverclockProfile, ProfileStore},
    service::SystemdManager,
    thermal::{CoolingDevice, ThermalController, ThermalZone},
    vcgencmd::{VendorQuery, Vcgencmd},
};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Window used for the running average in `thermal monitor`
const MONITOR_AVERAGE_WINDOW: Duration = Duration::from_secs(60);

/// Explicitly constructed dependencies shared by all commands
pub struct App {
    settings: Settings,
    query: Arc<dyn VendorQuery>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        let query = Arc::new(Vcgencmd::new(
            settings.vcgencmd.clone(),
            settings.query_timeout(),
        ));
        Self { settings, query }
    }

    fn store(&self) -> ProfileStore {
        ProfileStore::load(&self.settings.profiles_file)
    }

    fn manager(&self) -> OverclockManager {
        OverclockManager::new(&self.settings.boot_config, self.query.clone())
            .with_armbian_env(&self.settings.armbian_env)
    }

    fn thermal(&self) -> ThermalController {
        ThermalController::new(
            self.query.clone(),
            ThermalZone::new(&self.settings.thermal_zone),
            CoolingDevice::new(&self.settings.cooling_device),
        )
    }

    /// Handle parsed CLI arguments
    pub async fn handle_args(&self, args: Args) -> Result<()> {
        match args.command {
            Commands::Profile { command } => self.handle_profile_command(command),
            Commands::Overclock { command } => self.handle_overclock_command(command).await,
            Commands::Thermal { command } => self.handle_thermal_command(command).await,
        }
    }

    fn handle_profile_command(&self, command: ProfileCommands) -> Result<()> {
        match command {
            ProfileCommands::List => {
                for profile in self.store().all() {
                    print_profile(profile);
                }
                Ok(())
            }
            ProfileCommands::Show { name } => {
                let store = self.store();
                let profile = store.require(&name)?;
                println!("{}", serde_json::to_string_pretty(profile)?);
                Ok(())
            }
            ProfileCommands::Add {
                name,
                arm_freq,
                gpu_freq,
                over_voltage,
                over_voltage_delta,
                description,
            } => {
                let profile = OverclockProfile::new(
                    name,
                    arm_freq,
                    gpu_freq,
                    over_voltage,
                    over_voltage_delta,
                    description,
                );
                let mut store = self.store();
                store.add_or_replace(profile.clone())?;
                println!("Saved profile:");
                print_profile(&profile);
                Ok(())
            }
            ProfileCommands::Recommend { cooling } => self.recommend(cooling),
        }
    }

    fn recommend(&self, cooling: CoolingType) -> Result<()> {
        let name = cooling.recommended_profile();
        let store = self.store();
        match store.get(name) {
            Some(profile) => print_profile(profile),
            None => println!("{}", name),
        }
        Ok(())
    }

    async fn handle_overclock_command(&self, command: OverclockCommands) -> Result<()> {
        match command {
            OverclockCommands::Apply { profile } => {
                let store = self.store();
                let profile = store.require(&profile)?;
                let outcome = self.manager().apply(profile)?;
                if let Some(backup) = &outcome.backup {
                    println!("Backup: {}", backup.display());
                }
                println!("{}", outcome.message);
                Ok(())
            }
            OverclockCommands::Remove => {
                let outcome = self.manager().remove()?;
                println!("{}", outcome.message);
                Ok(())
            }
            OverclockCommands::Status => self.overclock_status().await,
            OverclockCommands::StabilityTest { seconds } => {
                let report =
                    overclock::stability_test(&self.thermal(), Duration::from_secs(seconds))
                        .await?;
                println!("{}", report.message);
                Ok(())
            }
        }
    }

    async fn overclock_status(&self) -> Result<()> {
        let manager = self.manager();

        match manager.persisted_settings()? {
            Some(persisted) => println!(
                "Persisted: {} (arm {} MHz, gpu {} MHz, over_voltage {}, delta {})",
                persisted.profile.as_deref().unwrap_or("custom"),
                persisted.settings.arm_freq,
                persisted.settings.gpu_freq,
                persisted.settings.over_voltage,
                persisted.settings.over_voltage_delta
            ),
            None => println!("Persisted: none"),
        }

        match manager.live_settings().await {
            Ok(live) => println!(
                "Live: arm {} MHz, gpu {} MHz, over_voltage {}, delta {}",
                live.arm_freq, live.gpu_freq, live.over_voltage, live.over_voltage_delta
            ),
            Err(e) => {
                println!("Live: unavailable ({})", e);
                return Ok(());
            }
        }

        let state = manager.state().await?;
        let line = match state {
            OverclockState::NoOverclock => "State: no overclock".to_string(),
            OverclockState::PendingReboot(Some(name)) => {
                format!("State: {} pending reboot", name)
            }
            OverclockState::PendingReboot(None) => {
                "State: removal pending reboot".to_string()
            }
            OverclockState::Active(name) => format!("State: {} active", name),
        };
        println!("{}", line);
        Ok(())
    }

    async fn handle_thermal_command(&self, command: ThermalCommands) -> Result<()> {
        match command {
            ThermalCommands::Status => self.thermal_status().await,
            ThermalCommands::Throttle => {
                let status = self.thermal().throttle_status().await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
                Ok(())
            }
            ThermalCommands::Curve { profile, temp } => {
                let curve = FanCurve::for_profile(&profile);
                for point in curve.points() {
                    println!("{:>4}°C -> {:>3}%", point.temperature, point.fan_speed);
                }
                if let Some(temp) = temp {
                    println!("At {:.1}°C: {}%", temp, curve.speed_for(temp));
                }
                Ok(())
            }
            ThermalCommands::SetFan { percent } => {
                let state = self.thermal().set_fan_speed(percent)?;
                println!("Fan set to {}% (state {})", percent, state);
                Ok(())
            }
            ThermalCommands::Monitor { seconds } => self.monitor(seconds).await,
            ThermalCommands::Install { profile } => {
                let curve = profile
                    .as_deref()
                    .map(FanCurve::for_profile)
                    .unwrap_or_else(FanCurve::standard);
                let payload = DaemonPayload::new(curve, profile, &self.settings);
                let installer =
                    DaemonInstaller::new(&self.settings, SystemdManager::connect().await?);
                installer.install(&payload).await?;
                println!("Fan control service installed and started");
                Ok(())
            }
            ThermalCommands::Uninstall => {
                let installer =
                    DaemonInstaller::new(&self.settings, SystemdManager::connect().await?);
                installer.uninstall().await?;
                println!("Fan control service removed");
                Ok(())
            }
            ThermalCommands::Daemon { payload } => {
                let path = payload.unwrap_or_else(|| self.settings.daemon_payload.clone());
                info!("Loading fan control payload from {}", path.display());
                let payload = DaemonPayload::load(&path)?;
                FanDaemon::from_payload(payload).run().await
            }
        }
    }

    async fn thermal_status(&self) -> Result<()> {
        let thermal = self.thermal();

        match thermal.temperature().await {
            Ok(t) => println!("Temperature: {:.1}°C", t),
            Err(e) => println!("Temperature: unavailable ({})", e),
        }
        match thermal.fan_speed() {
            Ok(speed) => println!("Fan: {}%", speed),
            Err(e) => println!("Fan: unavailable ({})", e),
        }
        match thermal.throttle_status().await {
            Ok(status) if status.any() => println!(
                "Throttle: throttled={} temperature_limit={} undervoltage={} frequency_capped={}",
                status.throttled,
                status.temperature_limit,
                status.undervoltage,
                status.frequency_capped
            ),
            Ok(_) => println!("Throttle: none"),
            Err(e) => println!("Throttle: unavailable ({})", e),
        }
        Ok(())
    }

    async fn monitor(&self, seconds: u64) -> Result<()> {
        let mut thermal = self.thermal();
        debug!("Monitoring for {} seconds", seconds);

        for _ in 0..seconds {
            let reading = thermal.record().await?;
            let average = thermal.average(MONITOR_AVERAGE_WINDOW).await?;
            let fan = reading
                .fan_speed
                .map(|s| format!("{}%", s))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "Temp: {:.1}°C | Avg: {:.1}°C | Fan: {}",
                reading.temperature, average, fan
            );
            sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }
}

fn print_profile(profile: &OverclockProfile) {
    println!(
        "{:<12} arm {:>4} MHz  gpu {:>4} MHz  over_voltage {:>3}  delta {:>6}  {}",
        profile.name,
        profile.arm_freq,
        profile.gpu_freq,
        profile.over_voltage,
        profile.over_voltage_delta,
        profile.description
    );
}
