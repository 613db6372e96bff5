//! Command handlers for the deskdock CLI

use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use deskdock_core::{rank, BridgeConfig, Clock, RankedApp, Registry, SystemClock, TopSet};
use deskdock_runtime::{list_ports, Bridge, PortSummary, SerialPortProvider};

use crate::apps::{ProcessEnumerator, TileIconExtractor};
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::controls::{ActionTable, ShellControls};
use crate::error::{CliError, Result};

/// Runs one parsed invocation
pub struct CommandRunner;

impl CommandRunner {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Run { single_exchange } => {
                let bridge_config = config.bridge_config(&cli, single_exchange);
                Self::handle_run(&config, bridge_config).await
            }
            Commands::Apps => Self::handle_apps(&config.bridge_config(&cli, false)),
            Commands::Top => Self::handle_top(&config.bridge_config(&cli, false)),
            Commands::Ports => Self::handle_ports(&config.bridge_config(&cli, false)),
            Commands::Config { write } => Self::handle_config(&cli, &config, write),
        }
    }

    /// Run the bridge until Ctrl+C
    async fn handle_run(config: &AppConfig, bridge_config: BridgeConfig) -> Result<()> {
        let actions = ActionTable::new(config.actions.clone());
        info!(
            "Device commands: {}",
            actions.keys().collect::<Vec<_>>().join(", ")
        );

        let bridge = Bridge::builder(bridge_config)
            .with_provider(Arc::new(SerialPortProvider::new()))
            .with_controls(Arc::new(ShellControls::new(config.controls.clone())))
            .with_dispatcher(Arc::new(actions))
            .with_enumerator(Arc::new(ProcessEnumerator::new(&config.apps)))
            .with_extractor(Arc::new(TileIconExtractor::new()))
            .build()
            .await?;

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupted; shutting down"),
                Err(e) => warn!("Cannot listen for Ctrl+C: {}", e),
            }
            interrupt.cancel();
        });

        bridge.run(cancel).await?;
        Ok(())
    }

    fn handle_apps(bridge_config: &BridgeConfig) -> Result<()> {
        let registry = Registry::load(&bridge_config.icons.registry_path)?;
        let ranked = rank(&registry, SystemClock::new().now(), &bridge_config.ranking);
        print!("{}", format_apps(&registry, &ranked));
        Ok(())
    }

    fn handle_top(bridge_config: &BridgeConfig) -> Result<()> {
        let top = TopSet::load(&bridge_config.icons.top_apps_path)?;
        if top.names.is_empty() {
            println!("No top set written yet");
        }
        for (i, name) in top.names.iter().enumerate() {
            println!("{:>2}. {}", i + 1, name);
        }
        Ok(())
    }

    fn handle_ports(bridge_config: &BridgeConfig) -> Result<()> {
        let ports = list_ports()?;
        print!(
            "{}",
            format_ports(
                &ports,
                bridge_config.serial.vendor_id,
                bridge_config.serial.product_id
            )
        );
        Ok(())
    }

    fn handle_config(cli: &Cli, config: &AppConfig, write: bool) -> Result<()> {
        print!("{}", config.to_toml()?);
        if write {
            let path = cli
                .config
                .clone()
                .or_else(AppConfig::default_config_path)
                .ok_or_else(|| CliError::Config("No configuration path available".to_string()))?;
            config.save_to_file(&path)?;
            info!("Configuration written to {}", path.display());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Output Formatting
// ----------------------------------------------------------------------------

/// One row per ranked app: position, name, runs, last run, score
pub fn format_apps(registry: &Registry, ranked: &[RankedApp]) -> String {
    if ranked.is_empty() {
        return "No applications registered yet\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>3}  {:<24} {:>5}  {:<19}  {:>8}",
        "#", "NAME", "RUNS", "LAST RUN", "SCORE"
    );
    for (i, app) in ranked.iter().enumerate() {
        let (runs, last_run) = registry
            .get(&app.friendly_name)
            .map(|entry| {
                (
                    entry.times_run,
                    entry
                        .last_run
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                )
            })
            .unwrap_or((0, "-".to_string()));
        let _ = writeln!(
            out,
            "{:>3}  {:<24} {:>5}  {:<19}  {:>8.2}",
            i + 1,
            app.friendly_name,
            runs,
            last_run,
            app.score
        );
    }
    out
}

/// One row per port, with a marker on the ones carrying the device's USB id
pub fn format_ports(ports: &[PortSummary], vendor_id: u16, product_id: u16) -> String {
    if ports.is_empty() {
        return "No serial ports found\n".to_string();
    }

    let mut out = String::new();
    for port in ports {
        let marker = if port.usb_ids == Some((vendor_id, product_id)) {
            "*"
        } else {
            " "
        };
        let ids = port
            .usb_ids
            .map(|(vid, pid)| format!("{vid:04x}:{pid:04x}"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{} {:<20} {:<9} {}",
            marker,
            port.name,
            ids,
            port.product.as_deref().unwrap_or("")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use deskdock_core::{AppObservation, RankingConfig};
    use std::path::PathBuf;

    #[test]
    fn test_format_apps_lists_ranked_rows() {
        let now = NaiveDate::from_ymd_opt(2025, 8, 22)
            .unwrap()
            .and_hms_opt(18, 47, 12)
            .unwrap();
        let mut registry = Registry::new();
        for name in ["vlc", "zed", "vlc"] {
            registry.record_observation(
                AppObservation {
                    friendly_name: name.to_string(),
                    exe_path: format!("/usr/bin/{name}"),
                    icon_bin: PathBuf::from(format!("{name}.bin")),
                    icon_png: None,
                },
                now,
            );
        }
        let ranked = rank(&registry, now, &RankingConfig::default());

        let out = format_apps(&registry, &ranked);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("vlc"));
        assert!(lines[1].contains("2025-08-22 18:47:12"));
        assert!(lines[2].contains("zed"));

        assert_eq!(format_apps(&Registry::new(), &[]), "No applications registered yet\n");
    }

    #[test]
    fn test_format_ports_marks_device() {
        let ports = vec![
            PortSummary {
                name: "/dev/ttyS0".to_string(),
                usb_ids: None,
                product: None,
            },
            PortSummary {
                name: "/dev/ttyUSB0".to_string(),
                usb_ids: Some((0x1a86, 0x7523)),
                product: Some("USB Serial".to_string()),
            },
        ];

        let out = format_ports(&ports, 6790, 29987);
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("  /dev/ttyS0"));
        assert!(lines[1].starts_with("* /dev/ttyUSB0"));
        assert!(lines[1].contains("1a86:7523"));
    }
}
