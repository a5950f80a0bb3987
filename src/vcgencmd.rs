//! Firmware queries through the `vcgencmd` tool and external command plumbing

use crate::errors::{OverkillError, Result};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tokio::process::Command;

/// Run `program args..` and return its stdout, failing on a non-zero exit or
/// when the command does not finish within `timeout`.
pub async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!("Running command: {}", command_line);

    let child = Command::new(program).args(args).kill_on_drop(true).output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| OverkillError::CommandFailed {
            command: command_line.clone(),
            reason: format!("timed out after {:?}", timeout),
        })?
        .map_err(|e| OverkillError::CommandFailed {
            command: command_line.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(OverkillError::CommandFailed {
            command: command_line,
            reason: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Source of firmware-reported values (`key=value` text responses)
#[async_trait]
pub trait VendorQuery: Send + Sync {
    /// Run one query, e.g. `["measure_temp"]`, returning the raw response
    async fn query(&self, args: &[&str]) -> Result<String>;

    /// SoC temperature in °C
    async fn measure_temp(&self) -> Result<f32> {
        let response = self.query(&["measure_temp"]).await?;
        parse_temperature(&response)
    }

    /// Raw throttle bitmask
    async fn get_throttled(&self) -> Result<u32> {
        let response = self.query(&["get_throttled"]).await?;
        parse_throttled(&response)
    }

    /// Integer value of a live firmware config key
    async fn get_config(&self, key: &str) -> Result<i32> {
        let response = self.query(&["get_config", key]).await?;
        parse_int(&response)
    }
}

/// The real `vcgencmd` binary
#[derive(Debug, Clone)]
pub struct Vcgencmd {
    program: String,
    timeout: Duration,
}

impl Vcgencmd {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl Default for Vcgencmd {
    fn default() -> Self {
        Self::new("vcgencmd", Duration::from_secs(2))
    }
}

#[async_trait]
impl VendorQuery for Vcgencmd {
    async fn query(&self, args: &[&str]) -> Result<String> {
        run_command(&self.program, args, self.timeout).await
    }
}

fn malformed(response: &str) -> OverkillError {
    OverkillError::SensorUnavailable(format!("malformed response: {:?}", response.trim()))
}

/// Value part of a `key=value` response
pub fn response_value(response: &str) -> Option<&str> {
    response.trim().split_once('=').map(|(_, value)| value.trim())
}

/// `temp=53.2'C` -> 53.2
pub fn parse_temperature(response: &str) -> Result<f32> {
    let value = response_value(response).ok_or_else(|| malformed(response))?;
    let number = value.trim_end_matches("'C").trim_end_matches("°C");
    number.trim().parse().map_err(|_| malformed(response))
}

/// `throttled=0x50005` -> 0x50005
pub fn parse_throttled(response: &str) -> Result<u32> {
    let value = response_value(response).ok_or_else(|| malformed(response))?;
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).map_err(|_| malformed(response))
}

/// `arm_freq=2800` -> 2800
pub fn parse_int(response: &str) -> Result<i32> {
    let value = response_value(response).ok_or_else(|| malformed(response))?;
    value.parse().map_err(|_| malformed(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_temperature() {
        assert_eq!(parse_temperature("temp=53.2'C\n").unwrap(), 53.2);
        assert_eq!(parse_temperature("temp=41.0'C").unwrap(), 41.0);
        assert!(parse_temperature("error=1 error_msg=\"x\"").is_err());
        assert!(parse_temperature("garbage").is_err());
    }

    #[test]
    fn test_parse_throttled() {
        assert_eq!(parse_throttled("throttled=0x50005\n").unwrap(), 0x50005);
        assert_eq!(parse_throttled("throttled=0x0").unwrap(), 0);
        assert!(parse_throttled("throttled=").is_err());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("arm_freq=2800\n").unwrap(), 2800);
        assert_eq!(parse_int("over_voltage=-2").unwrap(), -2);
        assert!(parse_int("arm_freq").is_err());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_command_failure() {
        let err = run_command(
            "/nonexistent/overkill-test-binary",
            &[],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OverkillError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_slow_command_times_out() {
        let started = std::time::Instant::now();
        let err = run_command("sleep", &["5"], Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            OverkillError::CommandFailed { command, reason } => {
                assert_eq!(command, "sleep 5");
                assert!(reason.contains("timed out"), "{}", reason);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
