//! Shared fixtures for the runtime integration tests
//!
//! Builds bridge services over a temporary data directory with recording collaborators,
//! so tests can drive sessions against the in-memory device and inspect every side
//! effect afterwards.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use deskdock_core::{
    encode_icon, AppObservation, BridgeConfig, Clock, IconImage, IconSyncConfig, ManualClock,
    SerialConfig, TelemetryConfig,
};
use deskdock_runtime::testing::{FixedTelemetry, MemoryDevice, RecordingControls, RecordingDispatcher};
use deskdock_runtime::{
    BridgeServices, RegistryStore, SessionContext, SessionInfo, SharedChannel, SyncTracker,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

pub fn test_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 8, 22)
        .unwrap()
        .and_hms_opt(18, 47, 12)
        .unwrap()
}

/// Defaults with the waits shortened so sessions start immediately
pub fn fast_config() -> BridgeConfig {
    let serial = SerialConfig::default()
        .with_settle_delay(Duration::ZERO)
        .with_discovery_backoff(Duration::from_millis(20));
    let telemetry = TelemetryConfig {
        slow_interval_ms: 50,
        fast_interval_ms: 20,
        command_poll_ms: 20,
        ..TelemetryConfig::default()
    };
    let icons = IconSyncConfig {
        chunk_size: 16,
        ready_timeout_ms: 300,
        ack_timeout_ms: 200,
        sync_interval_ms: 50,
        watch_interval_ms: 50,
        icon_width: 4,
        icon_height: 4,
        ..IconSyncConfig::default()
    };
    BridgeConfig::default()
        .with_serial(serial)
        .with_telemetry(telemetry)
        .with_icons(icons)
}

// ----------------------------------------------------------------------------
// Test Bridge
// ----------------------------------------------------------------------------

/// Services plus handles on the fakes behind them
pub struct TestBridge {
    pub services: Arc<BridgeServices>,
    pub controls: Arc<RecordingControls>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub clock: ManualClock,
    pub dir: TempDir,
}

impl TestBridge {
    pub fn icons_dir(&self) -> PathBuf {
        self.services.config.icons.icons_dir.clone()
    }

    /// Write a solid 4x4 icon for `name` and record one observation of it
    pub async fn register_app(&self, name: &str) -> Vec<u8> {
        let icons = &self.services.config.icons;
        std::fs::create_dir_all(&icons.icons_dir).unwrap();
        let payload = encode_icon(&IconImage::solid(
            icons.icon_width,
            icons.icon_height,
            [200, 40, 40],
        ));
        let icon_bin = icons.icons_dir.join(format!("{name}.bin"));
        std::fs::write(&icon_bin, &payload).unwrap();

        self.services
            .registry
            .record(
                AppObservation {
                    friendly_name: name.to_string(),
                    exe_path: format!("/opt/apps/{name}"),
                    icon_bin,
                    icon_png: None,
                },
                self.clock.now(),
            )
            .await
            .unwrap();
        payload
    }
}

/// Services over a fresh temporary data directory
pub fn create_test_bridge(config: BridgeConfig) -> TestBridge {
    create_test_bridge_with_known(config, BTreeSet::new())
}

/// Services whose sync tracker already knows `known`
pub fn create_test_bridge_with_known(config: BridgeConfig, known: BTreeSet<String>) -> TestBridge {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config;
    config.icons = config.icons.with_data_dir(dir.path());

    let controls = Arc::new(RecordingControls::new(35, 80));
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let clock = ManualClock::new(test_now());
    let registry = RegistryStore::open(&config.icons, config.ranking.clone()).unwrap();

    let services = Arc::new(BridgeServices {
        config,
        controls: controls.clone(),
        dispatcher: dispatcher.clone(),
        telemetry: Arc::new(FixedTelemetry::default()),
        clock: Arc::new(clock.clone()),
        registry,
        sync: Arc::new(SyncTracker::new(known)),
    });

    TestBridge {
        services,
        controls,
        dispatcher,
        clock,
        dir,
    }
}

// ----------------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------------

/// A live session over `device` without going through the handshake
pub fn create_test_session(device: &MemoryDevice) -> Arc<SessionContext> {
    let info = SessionInfo {
        port: "mem0".to_string(),
        started_at: test_now(),
    };
    Arc::new(SessionContext::new(
        info,
        Arc::new(SharedChannel::new(device.link("mem0"), 4096)),
        CancellationToken::new(),
    ))
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
