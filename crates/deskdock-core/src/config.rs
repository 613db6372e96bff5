//! Bridge configuration
//!
//! All durations are stored as milliseconds so the structures serialize cleanly to TOML;
//! accessor methods hand out [`Duration`]s. Every section has `#[serde(default)]`, so a
//! configuration file only needs to name the values it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{DeskdockError, DeskdockResult};

// ----------------------------------------------------------------------------
// Serial Link
// ----------------------------------------------------------------------------

/// How the device is located, opened and greeted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// USB vendor id of the peripheral's serial chip
    pub vendor_id: u16,
    /// USB product id of the peripheral's serial chip
    pub product_id: u16,
    /// Fixed line speed
    pub baud_rate: u32,
    /// Open this port directly instead of searching by vid/pid
    pub port_override: Option<String>,
    /// Per-read timeout on the port; bounds how long a single poll blocks
    pub read_timeout_ms: u64,
    /// Delay after opening so the peripheral can finish its boot reset
    pub settle_delay_ms: u64,
    /// Wait between discovery attempts when no device matches
    pub discovery_backoff_ms: u64,
    /// Maximum wait for the device-ready token
    pub handshake_timeout_ms: u64,
    /// Token sent by the host once the port is open
    pub host_ready_token: String,
    /// Token the device answers with
    pub device_ready_token: String,
    /// Inbound lines longer than this without a newline are dropped
    pub max_line_len: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            vendor_id: 6790,
            product_id: 29987,
            baud_rate: 230_400,
            port_override: None,
            read_timeout_ms: 50,
            settle_delay_ms: 1000,
            discovery_backoff_ms: 700,
            handshake_timeout_ms: 2000,
            host_ready_token: "host_ok".to_string(),
            device_ready_token: "ESP32_ok".to_string(),
            max_line_len: 4096,
        }
    }
}

impl SerialConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the USB vendor/product id pair to search for
    pub fn with_device_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Open a fixed port path instead of searching
    pub fn with_port_override(mut self, port: Option<String>) -> Self {
        self.port_override = port;
        self
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the post-open settle delay
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the discovery retry backoff
    pub fn with_discovery_backoff(mut self, backoff: Duration) -> Self {
        self.discovery_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn discovery_backoff(&self) -> Duration {
        Duration::from_millis(self.discovery_backoff_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Session Tasks
// ----------------------------------------------------------------------------

/// Which set of tasks drives a connected session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Slow/fast telemetry, command reader and icon sync run in parallel
    #[default]
    Concurrent,
    /// One loop alternates a telemetry write with a single inbound read and
    /// enforces the idle timeout
    SingleExchange,
}

/// Telemetry cadence and inbound polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub mode: SessionMode,
    /// Period of the system snapshot message
    pub slow_interval_ms: u64,
    /// Period of the volume/brightness message; 0 sends as fast as the link allows
    pub fast_interval_ms: u64,
    /// How long the command reader waits for a line before re-checking cancellation
    pub command_poll_ms: u64,
    /// Session ends after this long without inbound data (single-exchange mode)
    pub idle_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Concurrent,
            slow_interval_ms: 500,
            fast_interval_ms: 0,
            command_poll_ms: 100,
            idle_timeout_ms: 5000,
        }
    }
}

impl TelemetryConfig {
    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_fast_interval(mut self, interval: Duration) -> Self {
        self.fast_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_millis(self.slow_interval_ms)
    }

    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    pub fn command_poll(&self) -> Duration {
        Duration::from_millis(self.command_poll_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Icon Sync
// ----------------------------------------------------------------------------

/// Icon storage, watcher cadence and transfer protocol parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IconSyncConfig {
    /// Size of each raw payload write
    pub chunk_size: usize,
    /// Wait for the device's ready marker after an announce
    pub ready_timeout_ms: u64,
    /// Wait for an optional checksum acknowledgement after `done`
    pub ack_timeout_ms: u64,
    /// Extra full transfers attempted after a checksum rejection
    pub max_resends: u32,
    /// Fallback polling period of the sync worker
    pub sync_interval_ms: u64,
    /// Period of the application watcher
    pub watch_interval_ms: u64,
    /// Marker the device puts in its ready line
    pub ready_marker: String,
    /// Icon dimensions requested from the extractor
    pub icon_width: u16,
    pub icon_height: u16,
    /// Persisted registry document
    pub registry_path: PathBuf,
    /// Persisted top set document
    pub top_apps_path: PathBuf,
    /// Directory of encoded device icons
    pub icons_dir: PathBuf,
}

impl Default for IconSyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            ready_timeout_ms: 2000,
            ack_timeout_ms: 500,
            max_resends: 2,
            sync_interval_ms: 1000,
            watch_interval_ms: 5000,
            ready_marker: "waiting_for_icon".to_string(),
            icon_width: 100,
            icon_height: 100,
            registry_path: PathBuf::from("apps.json"),
            top_apps_path: PathBuf::from("top_apps.json"),
            icons_dir: PathBuf::from("lvgl_bin_icons"),
        }
    }
}

impl IconSyncConfig {
    /// Place every persisted artifact under `dir`
    pub fn with_data_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        let dir = dir.as_ref();
        self.registry_path = dir.join("apps.json");
        self.top_apps_path = dir.join("top_apps.json");
        self.icons_dir = dir.join("lvgl_bin_icons");
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

// ----------------------------------------------------------------------------
// Ranking
// ----------------------------------------------------------------------------

/// Weights of the usage score and size of the top set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Weight of `times_run`
    pub alpha: f64,
    /// Weight of the recency bucket
    pub beta: f64,
    /// Number of apps in the top set
    pub top_n: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 2.0,
            top_n: 12,
        }
    }
}

// ----------------------------------------------------------------------------
// Bridge Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of the bridge engine
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub telemetry: TelemetryConfig,
    pub icons: IconSyncConfig,
    pub ranking: RankingConfig,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_icons(mut self, icons: IconSyncConfig) -> Self {
        self.icons = icons;
        self
    }

    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    /// Check values that would make the bridge spin or stall
    pub fn validate(&self) -> DeskdockResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(DeskdockError::config_error("Baud rate must be greater than 0"));
        }
        if self.serial.handshake_timeout_ms == 0 {
            return Err(DeskdockError::config_error(
                "Handshake timeout must be greater than 0",
            ));
        }
        if self.serial.host_ready_token.is_empty() || self.serial.device_ready_token.is_empty() {
            return Err(DeskdockError::config_error("Handshake tokens must not be empty"));
        }
        if self.serial.max_line_len == 0 {
            return Err(DeskdockError::config_error(
                "Maximum line length must be greater than 0",
            ));
        }
        if self.telemetry.slow_interval_ms == 0 {
            return Err(DeskdockError::config_error(
                "Slow telemetry interval must be greater than 0",
            ));
        }
        if self.icons.chunk_size == 0 {
            return Err(DeskdockError::config_error("Chunk size must be greater than 0"));
        }
        if self.icons.ready_marker.is_empty() {
            return Err(DeskdockError::config_error("Icon ready marker must not be empty"));
        }
        if self.icons.icon_width == 0 || self.icons.icon_height == 0 {
            return Err(DeskdockError::config_error("Icon dimensions must be non-zero"));
        }
        if !self.ranking.alpha.is_finite() || !self.ranking.beta.is_finite() {
            return Err(DeskdockError::config_error("Ranking weights must be finite"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_constants() {
        let config = BridgeConfig::default();
        assert_eq!(config.serial.baud_rate, 230_400);
        assert_eq!(config.serial.discovery_backoff(), Duration::from_millis(700));
        assert_eq!(config.serial.handshake_timeout(), Duration::from_secs(2));
        assert_eq!(config.telemetry.slow_interval(), Duration::from_millis(500));
        assert_eq!(config.telemetry.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.icons.chunk_size, 512);
        assert_eq!(config.ranking.top_n, 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_chunk_size() {
        let config =
            BridgeConfig::default().with_icons(IconSyncConfig::default().with_chunk_size(0));
        assert!(matches!(
            config.validate(),
            Err(DeskdockError::Configuration { .. })
        ));
    }

    #[test]
    fn test_data_dir_relocates_persisted_paths() {
        let icons = IconSyncConfig::default().with_data_dir("/var/lib/deskdock");
        assert_eq!(icons.registry_path, PathBuf::from("/var/lib/deskdock/apps.json"));
        assert_eq!(
            icons.icons_dir,
            PathBuf::from("/var/lib/deskdock/lvgl_bin_icons")
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"serial": {"vendor_id": 4292, "product_id": 60000}}"#)
                .unwrap();
        assert_eq!(config.serial.vendor_id, 4292);
        assert_eq!(config.serial.baud_rate, 230_400);
        assert_eq!(config.telemetry.mode, SessionMode::Concurrent);
    }
}
