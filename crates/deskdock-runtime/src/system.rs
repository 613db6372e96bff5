//! Host system telemetry
//!
//! [`TelemetrySource`] supplies the values of the slow telemetry message. The production
//! source samples CPU, memory and temperature sensors through `sysinfo` and reads battery
//! state from the Linux power-supply class; hosts without a battery report a full one on
//! mains power.

use chrono::NaiveDateTime;
use deskdock_core::{CollaboratorError, SlowTelemetry};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::{Components, System};
use tracing::debug;

const BYTES_PER_MB: u64 = 1024 * 1024;

const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

// ----------------------------------------------------------------------------
// Telemetry Source
// ----------------------------------------------------------------------------

/// One sample of host state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemSample {
    pub os_name: String,
    /// Whole percent, 0-100
    pub cpu_usage: u8,
    /// Degrees Celsius, 0 when no sensor is readable
    pub cpu_temp: i32,
    pub mem_total_mb: u64,
    pub mem_used_mb: u64,
    pub battery_percent: u8,
    pub power_in: bool,
}

impl SystemSample {
    /// Build the wire message, stamping it with `now`
    pub fn into_slow_telemetry(self, now: NaiveDateTime) -> SlowTelemetry {
        let (date, time) = SlowTelemetry::clock_fields(now);
        SlowTelemetry {
            os_name: self.os_name,
            time,
            date,
            cpu_usage: self.cpu_usage,
            cpu_temp: self.cpu_temp,
            mem_max: self.mem_total_mb,
            mem_usage: self.mem_used_mb,
            battery_percent: self.battery_percent,
            power_in: self.power_in,
        }
    }
}

/// Supplies system samples; called from the blocking pool
pub trait TelemetrySource: Send + Sync {
    fn sample(&self) -> Result<SystemSample, CollaboratorError>;
}

// ----------------------------------------------------------------------------
// sysinfo Source
// ----------------------------------------------------------------------------

/// [`TelemetrySource`] backed by `sysinfo`
pub struct SysinfoTelemetry {
    system: Mutex<System>,
    power_supply_dir: PathBuf,
}

impl SysinfoTelemetry {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first one
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            power_supply_dir: PathBuf::from(POWER_SUPPLY_DIR),
        }
    }

    /// Read battery state from another power-supply directory
    pub fn with_power_supply_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.power_supply_dir = dir.into();
        self
    }
}

impl Default for SysinfoTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for SysinfoTelemetry {
    fn sample(&self) -> Result<SystemSample, CollaboratorError> {
        let mut system = self.system.lock().map_err(|_| CollaboratorError::Failed {
            operation: "system_sample".to_string(),
            reason: "sampler lock poisoned".to_string(),
        })?;
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_usage = system.global_cpu_usage().round().clamp(0.0, 100.0) as u8;
        let (battery_percent, power_in) = read_battery(&self.power_supply_dir);

        Ok(SystemSample {
            os_name: os_name().to_string(),
            cpu_usage,
            cpu_temp: cpu_temperature(),
            mem_total_mb: system.total_memory() / BYTES_PER_MB,
            mem_used_mb: system.used_memory() / BYTES_PER_MB,
            battery_percent,
            power_in,
        })
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// OS family name as the device displays it
pub fn os_name() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "windows" => "Windows",
        "macos" => "Darwin",
        "freebsd" => "FreeBSD",
        other => other,
    }
}

/// CPU package temperature, preferring CPU-labelled sensors; 0 when unavailable
fn cpu_temperature() -> i32 {
    let components = Components::new_with_refreshed_list();
    let readings: Vec<(String, f32)> = components
        .iter()
        .filter_map(|c| c.temperature().map(|t| (c.label().to_lowercase(), t)))
        .filter(|(_, t)| t.is_finite())
        .collect();

    let preferred = readings.iter().find(|(label, _)| {
        ["coretemp", "cpu", "package"]
            .iter()
            .any(|needle| label.contains(needle))
    });
    preferred
        .or_else(|| readings.first())
        .map(|(_, t)| t.round() as i32)
        .unwrap_or(0)
}

/// `(percent, on_mains)` from a Linux power-supply class directory
pub fn read_battery(dir: &Path) -> (u8, bool) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return (100, true);
    };

    let mut battery: Option<(u8, String)> = None;
    let mut mains_online = false;
    for entry in entries.flatten() {
        let path = entry.path();
        match read_trimmed(&path.join("type")).as_deref() {
            Some("Battery") if battery.is_none() => {
                let percent = read_trimmed(&path.join("capacity"))
                    .and_then(|c| c.parse::<u8>().ok())
                    .map(|c| c.min(100));
                let status = read_trimmed(&path.join("status")).unwrap_or_default();
                if let Some(percent) = percent {
                    battery = Some((percent, status));
                }
            }
            Some("Mains") | Some("USB") => {
                if read_trimmed(&path.join("online")).as_deref() == Some("1") {
                    mains_online = true;
                }
            }
            _ => {}
        }
    }

    match battery {
        Some((percent, status)) => {
            let charging = matches!(status.as_str(), "Charging" | "Full" | "Not charging");
            (percent, charging || mains_online)
        }
        None => {
            debug!("No battery under {}", dir.display());
            (100, true)
        }
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_supply(root: &Path, name: &str, files: &[(&str, &str)]) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for (file, contents) in files {
            std::fs::write(dir.join(file), format!("{contents}\n")).unwrap();
        }
    }

    #[test]
    fn test_no_power_supply_reports_full_on_mains() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_battery(&dir.path().join("missing")), (100, true));
        assert_eq!(read_battery(dir.path()), (100, true));
    }

    #[test]
    fn test_discharging_battery() {
        let dir = TempDir::new().unwrap();
        write_supply(
            dir.path(),
            "BAT0",
            &[("type", "Battery"), ("capacity", "64"), ("status", "Discharging")],
        );
        write_supply(dir.path(), "AC", &[("type", "Mains"), ("online", "0")]);
        assert_eq!(read_battery(dir.path()), (64, false));
    }

    #[test]
    fn test_battery_with_mains_online() {
        let dir = TempDir::new().unwrap();
        write_supply(
            dir.path(),
            "BAT1",
            &[("type", "Battery"), ("capacity", "80"), ("status", "Unknown")],
        );
        write_supply(dir.path(), "ADP1", &[("type", "Mains"), ("online", "1")]);
        assert_eq!(read_battery(dir.path()), (80, true));
    }
}
