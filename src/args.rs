//! Command line argument parsing for overkill

use crate::profile::CoolingType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Overclock and thermal control for Raspberry Pi 5 class boards
#[derive(Parser)]
#[command(name = "overkill")]
#[command(about = "Overclock profiles and fan control")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Settings file (defaults to $OVERKILL_CONFIG or /etc/overkill/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    /// True when running as the background fan daemon
    pub fn is_daemon(&self) -> bool {
        matches!(
            self.command,
            Commands::Thermal {
                command: ThermalCommands::Daemon { .. }
            }
        )
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Overclock profile management
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Boot configuration overclock settings
    Overclock {
        #[command(subcommand)]
        command: OverclockCommands,
    },
    /// Temperature, throttling and fan control
    Thermal {
        #[command(subcommand)]
        command: ThermalCommands,
    },
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// List available profiles
    List,
    /// Show one profile
    Show {
        /// Profile name
        name: String,
    },
    /// Add a profile or replace one with the same name
    Add {
        /// Profile name
        name: String,
        /// ARM clock in MHz (600-3000)
        #[arg(long)]
        arm_freq: i32,
        /// GPU clock in MHz (300-1100)
        #[arg(long)]
        gpu_freq: i32,
        /// Voltage step (-16 to 8)
        #[arg(long, allow_negative_numbers = true)]
        over_voltage: i32,
        /// Voltage offset in µV (0-100000)
        #[arg(long, default_value_t = 0)]
        over_voltage_delta: i32,
        /// Free-form description
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Recommend a profile for the fitted cooling
    Recommend {
        #[arg(value_enum)]
        cooling: CoolingType,
    },
}

#[derive(Subcommand)]
pub enum OverclockCommands {
    /// Write a profile into the boot configuration
    Apply {
        /// Profile name
        profile: String,
    },
    /// Remove overclock settings from the boot configuration
    Remove,
    /// Compare persisted and live settings
    Status,
    /// Run a stress test with the current clocks
    StabilityTest {
        /// Duration in seconds
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
}

#[derive(Subcommand)]
pub enum ThermalCommands {
    /// Show temperature, fan speed and throttle state
    Status,
    /// Decode the firmware throttle flags
    Throttle,
    /// Show the fan curve for a profile
    Curve {
        /// Profile name (unknown names use the balanced curve)
        profile: String,
        /// Evaluate the curve at this temperature
        #[arg(long)]
        temp: Option<f32>,
    },
    /// Set the fan speed once
    SetFan {
        /// Fan speed in percent
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Record readings every second and print the running average
    Monitor {
        /// Duration in seconds
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
    /// Install the fan control service
    Install {
        /// Use the curve tuned for this overclock profile
        #[arg(long)]
        profile: Option<String>,
    },
    /// Remove the fan control service
    Uninstall,
    /// Run the fan control loop (used by the service)
    Daemon {
        /// Payload written by `install`
        #[arg(long)]
        payload: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_negative_over_voltage_parses() {
        let args = Args::try_parse_from([
            "overkill",
            "profile",
            "add",
            "cool",
            "--arm-freq",
            "2000",
            "--gpu-freq",
            "800",
            "--over-voltage",
            "-2",
        ])
        .unwrap();

        match args.command {
            Commands::Profile {
                command: ProfileCommands::Add { over_voltage, .. },
            } => assert_eq!(over_voltage, -2),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_daemon_detection() {
        let args = Args::try_parse_from(["overkill", "thermal", "daemon"]).unwrap();
        assert!(args.is_daemon());
        let args = Args::try_parse_from(["overkill", "-v", "thermal", "status"]).unwrap();
        assert!(!args.is_daemon());
        assert_eq!(args.verbose, 1);
    }

    #[test]
    fn test_fan_percent_bounds() {
        assert!(Args::try_parse_from(["overkill", "thermal", "set-fan", "100"]).is_ok());
        assert!(Args::try_parse_from(["overkill", "thermal", "set-fan", "101"]).is_err());
    }
}
