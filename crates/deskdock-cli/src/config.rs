//! deskdock CLI configuration
//!
//! The file is TOML. Bridge sections (`serial`, `telemetry`, `icons`, `ranking`) map onto
//! the engine's configuration; `controls`, `apps` and `actions` configure the host
//! collaborators the CLI provides. Every section is optional.
//!
//! Resolution order: `--config`, then `~/.deskdock/config.toml` when it exists, then
//! defaults. Relative icon and registry paths are resolved against the data directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use deskdock_core::{
    BridgeConfig, IconSyncConfig, RankingConfig, SerialConfig, SessionMode, TelemetryConfig,
};

use crate::cli::Cli;
use crate::controls::Action;
use crate::error::{CliError, Result};

const CONFIG_DIR_NAME: &str = ".deskdock";
const CONFIG_FILE_NAME: &str = "config.toml";

// ----------------------------------------------------------------------------
// Collaborator Sections
// ----------------------------------------------------------------------------

/// Shell command templates for the OS settings; `{value}` is replaced by 0-100.
///
/// An empty template marks the operation unsupported on this host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub volume_get: String,
    pub volume_set: String,
    pub brightness_get: String,
    pub brightness_set: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            Self {
                volume_get: "pactl get-sink-volume @DEFAULT_SINK@".to_string(),
                volume_set: "pactl set-sink-volume @DEFAULT_SINK@ {value}%".to_string(),
                brightness_get: "brightnessctl -m".to_string(),
                brightness_set: "brightnessctl -q set {value}%".to_string(),
            }
        } else if cfg!(target_os = "macos") {
            Self {
                volume_get: "osascript -e 'output volume of (get volume settings)'".to_string(),
                volume_set: "osascript -e 'set volume output volume {value}'".to_string(),
                brightness_get: String::new(),
                brightness_set: String::new(),
            }
        } else {
            Self {
                volume_get: String::new(),
                volume_set: String::new(),
                brightness_get: String::new(),
                brightness_set: String::new(),
            }
        }
    }
}

/// Which running processes count as user applications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppsConfig {
    /// Process names never recorded, compared case-insensitively
    pub deny_list: Vec<String>,
    /// Executables under these directories are system processes
    pub system_dirs: Vec<PathBuf>,
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            deny_list: [
                "svchost.exe",
                "services.exe",
                "lsass.exe",
                "winlogon.exe",
                "deskdock",
                "systemd",
                "dbus-daemon",
                "pipewire",
                "wireplumber",
                "Xwayland",
            ]
            .iter()
            .map(|name| name.to_string())
            .collect(),
            system_dirs: [
                "C:\\Windows",
                "/usr/lib",
                "/usr/libexec",
                "/usr/sbin",
                "/sbin",
                "/lib",
                "/System",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
        }
    }
}

/// Key-press actions the device can request out of the box
fn default_actions() -> BTreeMap<String, Action> {
    let keys: &[(&str, &str)] = if cfg!(target_os = "linux") {
        &[
            ("copy", "xdotool key ctrl+c"),
            ("paste", "xdotool key ctrl+v"),
            ("cut", "xdotool key ctrl+x"),
        ]
    } else if cfg!(target_os = "macos") {
        &[
            (
                "copy",
                "osascript -e 'tell application \"System Events\" to keystroke \"c\" using command down'",
            ),
            (
                "paste",
                "osascript -e 'tell application \"System Events\" to keystroke \"v\" using command down'",
            ),
            (
                "cut",
                "osascript -e 'tell application \"System Events\" to keystroke \"x\" using command down'",
            ),
        ]
    } else {
        &[]
    };

    keys.iter()
        .map(|(key, shell)| {
            (
                key.to_string(),
                Action::Shell {
                    shell: shell.to_string(),
                },
            )
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of the `deskdock` binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base directory for relative registry and icon paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub serial: SerialConfig,
    pub telemetry: TelemetryConfig,
    pub icons: IconSyncConfig,
    pub ranking: RankingConfig,
    pub controls: ControlsConfig,
    pub apps: AppsConfig,
    /// Device command key to action
    pub actions: BTreeMap<String, Action>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            serial: SerialConfig::default(),
            telemetry: TelemetryConfig::default(),
            icons: IconSyncConfig::default(),
            ranking: RankingConfig::default(),
            controls: ControlsConfig::default(),
            apps: AppsConfig::default(),
            actions: default_actions(),
        }
    }
}

impl AppConfig {
    /// Resolve the configuration for this invocation
    pub fn load(cli: &Cli) -> Result<Self> {
        if let Some(path) = &cli.config {
            info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(path);
        }

        match Self::default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            _ => {
                info!("Using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// `~/.deskdock/config.toml`, when a home directory is known
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_data_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// `~/.deskdock`, when a home directory is known
    pub fn default_data_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME))
    }

    /// Check the bridge sections and the collaborator sections
    pub fn validate(&self) -> Result<()> {
        self.bridge_sections().validate()?;

        for (key, action) in &self.actions {
            if key.trim().is_empty() {
                return Err(CliError::Config("Action keys must not be empty".to_string()));
            }
            if action.is_empty() {
                return Err(CliError::Config(format!("Action '{key}' has nothing to run")));
            }
        }
        Ok(())
    }

    /// Engine configuration with command-line overrides applied.
    ///
    /// `--data-dir` relocates every persisted artifact; otherwise relative paths are
    /// resolved against the configured or default data directory.
    pub fn bridge_config(&self, cli: &Cli, single_exchange: bool) -> BridgeConfig {
        let mut config = self.bridge_sections();

        config.icons = match (&cli.data_dir, self.data_dir.clone().or_else(Self::default_data_dir)) {
            (Some(dir), _) => config.icons.with_data_dir(dir),
            (None, Some(dir)) => resolve_paths(config.icons, &dir),
            (None, None) => config.icons,
        };

        if cli.port.is_some() {
            config.serial = config.serial.with_port_override(cli.port.clone());
        }
        if single_exchange {
            config.telemetry = config.telemetry.with_mode(SessionMode::SingleExchange);
        }
        config
    }

    fn bridge_sections(&self) -> BridgeConfig {
        BridgeConfig::new()
            .with_serial(self.serial.clone())
            .with_telemetry(self.telemetry.clone())
            .with_icons(self.icons.clone())
            .with_ranking(self.ranking.clone())
    }
}

fn resolve_paths(icons: IconSyncConfig, dir: &Path) -> IconSyncConfig {
    IconSyncConfig {
        registry_path: dir.join(&icons.registry_path),
        top_apps_path: dir.join(&icons.top_apps_path),
        icons_dir: dir.join(&icons.icons_dir),
        ..icons
    }
}
