//! Structured view of the firmware boot configuration file.
//!
//! The document is split into three segments: the lines before the managed
//! section (preamble), the managed section itself and everything after it
//! (trailer). Only the managed section is ever edited; the other segments are
//! written back exactly as they were read.

use crate::profile::OverclockProfile;

/// First line of the managed section
pub const SECTION_MARKER: &str = "# OVERKILL PI 5 CONFIGURATION";

const PROFILE_PREFIX: &str = "# Profile: ";

/// Fixed platform lines emitted ahead of the clock settings
const PLATFORM_LINES: &[&str] = &[
    "dtparam=pciex1_gen=3",
    "gpu_mem=1024",
    "dtoverlay=vc4-kms-v3d-pi5",
    "max_framebuffers=3",
    "hdmi_enable_4kp60=1",
    "force_turbo=1",
];

/// Settings carried by the managed section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSettings {
    pub arm_freq: i32,
    pub gpu_freq: i32,
    pub over_voltage: i32,
    pub over_voltage_delta: i32,
}

impl ClockSettings {
    /// What the hardware runs with when nothing is overridden
    pub const HARDWARE_DEFAULT: ClockSettings = ClockSettings {
        arm_freq: 2400,
        gpu_freq: 900,
        over_voltage: 0,
        over_voltage_delta: 0,
    };

    fn assignments(&self) -> Vec<(&'static str, Option<i32>)> {
        let delta = (self.over_voltage_delta != 0).then_some(self.over_voltage_delta);
        vec![
            ("arm_freq", Some(self.arm_freq)),
            ("gpu_freq", Some(self.gpu_freq)),
            ("over_voltage", Some(self.over_voltage)),
            ("over_voltage_delta", delta),
        ]
    }
}

impl From<&OverclockProfile> for ClockSettings {
    fn from(profile: &OverclockProfile) -> Self {
        Self {
            arm_freq: profile.arm_freq,
            gpu_freq: profile.gpu_freq,
            over_voltage: profile.over_voltage,
            over_voltage_delta: profile.over_voltage_delta,
        }
    }
}

/// Values read back out of a managed section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSettings {
    pub profile: Option<String>,
    pub settings: ClockSettings,
}

/// Key of a `key=value` line, or `None` for comments and other lines
fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    trimmed.split_once('=').map(|(key, _)| key.trim())
}

fn line_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    match line_key(line) {
        Some(k) if k == key => line.split_once('=').map(|(_, v)| v.trim()),
        _ => None,
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Parsed boot configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfigDocument {
    preamble: Vec<String>,
    section: Option<Vec<String>>,
    trailer: Vec<String>,
    trailing_newline: bool,
}

impl BootConfigDocument {
    pub fn parse(content: &str) -> Self {
        let trailing_newline = content.ends_with('\n');
        let body = content.strip_suffix('\n').unwrap_or(content);
        let lines: Vec<String> = if content.is_empty() {
            Vec::new()
        } else {
            body.split('\n').map(str::to_string).collect()
        };

        let Some(start) = lines.iter().position(|l| l.trim_end() == SECTION_MARKER) else {
            return Self {
                preamble: lines,
                section: None,
                trailer: Vec::new(),
                trailing_newline,
            };
        };

        let end = lines[start..]
            .iter()
            .position(|l| is_blank(l))
            .map(|offset| start + offset)
            .unwrap_or(lines.len());

        let mut lines = lines;
        let trailer = lines.split_off(end);
        let section = lines.split_off(start);

        Self {
            preamble: lines,
            section: Some(section),
            trailer,
            trailing_newline,
        }
    }

    pub fn render(&self) -> String {
        let lines: Vec<&str> = self
            .preamble
            .iter()
            .chain(self.section.iter().flatten())
            .chain(self.trailer.iter())
            .map(String::as_str)
            .collect();

        let mut out = lines.join("\n");
        if self.trailing_newline && !lines.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn managed_section(&self) -> Option<&[String]> {
        self.section.as_deref()
    }

    /// Generate a complete managed section for `profile`
    pub fn generate_section(profile: &OverclockProfile) -> Vec<String> {
        let mut lines = vec![
            SECTION_MARKER.to_string(),
            format!("{}{}", PROFILE_PREFIX, profile.name),
        ];
        if !profile.description.is_empty() {
            lines.push(format!("# {}", profile.description));
        }
        lines.extend(PLATFORM_LINES.iter().map(|l| l.to_string()));

        for (key, value) in ClockSettings::from(profile).assignments() {
            if let Some(value) = value {
                lines.push(format!("{}={}", key, value));
            }
        }
        lines
    }

    /// Make the managed section carry `profile`'s settings.
    ///
    /// An absent section is appended after one separating blank line. An
    /// existing one has only its recognized keys and profile comment rewritten;
    /// anything else in it stays where it is.
    pub fn apply_profile(&mut self, profile: &OverclockProfile) {
        match self.section.as_mut() {
            None => {
                if self.preamble.last().is_some_and(|l| !is_blank(l)) {
                    self.preamble.push(String::new());
                }
                self.section = Some(Self::generate_section(profile));
                self.trailing_newline = true;
            }
            Some(section) => update_section(section, profile),
        }
    }

    /// Drop the managed section together with the blank line that ends it.
    /// Returns false when there was nothing to remove.
    pub fn remove_section(&mut self) -> bool {
        if self.section.take().is_none() {
            return false;
        }

        if self.trailer.is_empty() {
            // Section ran to EOF: also drop the separator added on append.
            if self.preamble.last().is_some_and(|l| is_blank(l)) {
                self.preamble.pop();
            }
        } else {
            self.trailer.remove(0);
        }
        true
    }

    /// Settings recorded in the managed section, if there is one
    pub fn persisted_settings(&self) -> Option<PersistedSettings> {
        let section = self.section.as_ref()?;

        let profile = section
            .iter()
            .find_map(|l| l.strip_prefix(PROFILE_PREFIX))
            .map(|name| name.trim().to_string());

        let read = |key: &str, default: i32| {
            section
                .iter()
                .find_map(|l| line_value(l, key))
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(default)
        };

        let defaults = ClockSettings::HARDWARE_DEFAULT;
        Some(PersistedSettings {
            profile,
            settings: ClockSettings {
                arm_freq: read("arm_freq", defaults.arm_freq),
                gpu_freq: read("gpu_freq", defaults.gpu_freq),
                over_voltage: read("over_voltage", defaults.over_voltage),
                over_voltage_delta: read("over_voltage_delta", defaults.over_voltage_delta),
            },
        })
    }
}

fn update_section(section: &mut Vec<String>, profile: &OverclockProfile) {
    let profile_line = format!("{}{}", PROFILE_PREFIX, profile.name);
    match section.iter().position(|l| l.starts_with(PROFILE_PREFIX)) {
        Some(idx) => section[idx] = profile_line,
        None => section.insert(1, profile_line),
    }

    let mut anchor = None;
    for (key, value) in ClockSettings::from(profile).assignments() {
        let existing: Vec<usize> = section
            .iter()
            .enumerate()
            .filter(|(_, l)| line_key(l) == Some(key))
            .map(|(i, _)| i)
            .collect();

        match (value, existing.split_first()) {
            (Some(value), Some((&first, rest))) => {
                section[first] = format!("{}={}", key, value);
                for &dup in rest.iter().rev() {
                    section.remove(dup);
                }
                anchor = Some(first);
            }
            (Some(value), None) => {
                let at = anchor.map(|i| i + 1).unwrap_or(section.len());
                section.insert(at, format!("{}={}", key, value));
                anchor = Some(at);
            }
            (None, Some(_)) => {
                for &idx in existing.iter().rev() {
                    section.remove(idx);
                }
            }
            (None, None) => {}
        }
    }
}
