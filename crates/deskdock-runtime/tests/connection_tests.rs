//! Connection manager tests against the in-memory device
//!
//! These tests cover discovery, the ready-token handshake and its timeout, and the
//! reconnect path after the link fails mid-session.

use deskdock_core::{
    ConnectionState, DeskdockError, DisconnectedState, SessionError, TransportError,
};
use deskdock_runtime::testing::{
    DeviceBehavior, MemoryDevice, MemoryProvider, PeripheralConfig, SimulatedPeripheral,
};
use deskdock_runtime::{ConnectionManager, SessionEnd};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

mod test_utils;
use test_utils::{create_test_bridge, fast_config, TestBridge};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn create_test_manager(device: MemoryDevice) -> (ConnectionManager, Arc<MemoryProvider>, TestBridge) {
    let bridge = create_test_bridge(fast_config());
    let provider = Arc::new(MemoryProvider::new(device));
    let manager = ConnectionManager::new(provider.clone(), Arc::clone(&bridge.services));
    (manager, provider, bridge)
}

// ----------------------------------------------------------------------------
// Handshake
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_handshake_success() {
    let (device, peripheral) = SimulatedPeripheral::attach(PeripheralConfig::default());
    let (mut manager, provider, _bridge) = create_test_manager(device.clone());

    let channel = manager.connect(&CancellationToken::new()).await.unwrap();

    assert!(manager.state().is_connected());
    assert_eq!(manager.state().port(), Some("mem0"));
    assert_eq!(channel.port(), "mem0");
    assert_eq!(provider.open_count(), 1);
    assert_eq!(peripheral.snapshot().handshakes, 1);
    // The host token goes out raw, without a line terminator
    assert_eq!(device.host_bytes(), b"host_ok".to_vec());
    assert_eq!(manager.stats().sessions_established, 1);
}

/// Firmware that sends its first command in the same write as the ready token
struct EagerFirmware;

impl DeviceBehavior for EagerFirmware {
    fn on_host_bytes(&mut self, bytes: &[u8]) -> Vec<u8> {
        if bytes.windows(7).any(|w| w == b"host_ok") {
            b"ESP32_ok\r\n{\"setVolume\": 30}\n".to_vec()
        } else {
            Vec::new()
        }
    }
}

#[tokio::test]
async fn test_bytes_after_device_token_reach_the_session() {
    let device = MemoryDevice::with_behavior(EagerFirmware);
    let (mut manager, _provider, _bridge) = create_test_manager(device);

    let channel = manager.connect(&CancellationToken::new()).await.unwrap();
    assert!(manager.state().is_connected());

    let line = channel.read_line(Duration::from_millis(100)).await.unwrap();
    assert_eq!(line.as_deref(), Some(r#"{"setVolume": 30}"#));
}

#[tokio::test]
async fn test_stale_input_is_discarded_before_handshake() {
    let quiet = PeripheralConfig {
        answer_handshake: false,
        ..PeripheralConfig::default()
    };
    let (silent_device, _log) = SimulatedPeripheral::attach(quiet);
    // A token left over from before the host token was sent must not count
    silent_device.push_to_host(b"ESP32_ok\r\n");
    let (mut manager, _provider, _bridge) = create_test_manager(silent_device);

    let result = manager.connect(&CancellationToken::new()).await;
    assert!(matches!(
        result,
        Err(DeskdockError::Session(SessionError::HandshakeTimeout { .. }))
    ));
}

#[tokio::test]
async fn test_handshake_times_out_after_two_seconds() {
    let config = PeripheralConfig {
        answer_handshake: false,
        ..PeripheralConfig::default()
    };
    let (device, _peripheral) = SimulatedPeripheral::attach(config);
    let (mut manager, _provider, _bridge) = create_test_manager(device);

    let started = Instant::now();
    let result = manager.connect(&CancellationToken::new()).await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(DeskdockError::Session(SessionError::HandshakeTimeout { duration_ms: 2000 }))
    ));
    assert!(elapsed >= Duration::from_millis(1900), "gave up after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
    assert!(matches!(
        manager.state(),
        ConnectionState::Disconnected(DisconnectedState {
            consecutive_failures: 1,
            ..
        })
    ));
    assert_eq!(manager.stats().handshake_failures, 1);
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_device_stays_discovering() {
    let (device, _peripheral) = SimulatedPeripheral::attach(PeripheralConfig::default());
    let (mut manager, provider, _bridge) = create_test_manager(device);
    provider.set_attached(false);

    let cancel = CancellationToken::new();
    for _ in 0..3 {
        let result = manager.connect(&cancel).await;
        assert!(matches!(
            result,
            Err(DeskdockError::Transport(TransportError::DeviceNotFound { .. }))
        ));
    }

    match manager.state() {
        ConnectionState::Discovering(state) => assert_eq!(state.attempts, 3),
        other => panic!("unexpected state {other}"),
    }
    assert_eq!(manager.stats().discovery_attempts, 3);
    assert_eq!(provider.open_count(), 0);

    provider.set_attached(true);
    manager.connect(&cancel).await.unwrap();
    assert!(manager.state().is_connected());
}

#[tokio::test]
async fn test_open_failure_is_retried() {
    let (device, _peripheral) = SimulatedPeripheral::attach(PeripheralConfig::default());
    let (mut manager, provider, _bridge) = create_test_manager(device);
    provider.set_fail_open(true);

    let cancel = CancellationToken::new();
    let result = manager.connect(&cancel).await;
    assert!(matches!(
        result,
        Err(DeskdockError::Transport(TransportError::OpenFailed { .. }))
    ));
    assert!(matches!(manager.state(), ConnectionState::Discovering(_)));

    provider.set_fail_open(false);
    assert!(manager.connect(&cancel).await.is_ok());
}

// ----------------------------------------------------------------------------
// Session Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_unplug_ends_session_and_reconnects() {
    let (device, peripheral) = SimulatedPeripheral::attach(PeripheralConfig::default());
    let (mut manager, _provider, _bridge) = create_test_manager(device.clone());
    let cancel = CancellationToken::new();

    let channel = manager.connect(&cancel).await.unwrap();
    let unplug = device.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        unplug.unplug();
    });

    let end = tokio::time::timeout(Duration::from_secs(5), manager.run_session(channel, &cancel))
        .await
        .expect("session should end after the unplug");
    assert!(matches!(end, SessionEnd::TaskFailed { .. }), "{end:?}");
    assert!(matches!(manager.state(), ConnectionState::Disconnected(_)));
    assert_eq!(manager.stats().sessions_ended, 1);

    // Telemetry reached the device before the link failed
    let log = peripheral.snapshot();
    assert!(!log.lines_with("OSName").is_empty());
    assert!(!log.lines_with("volume").is_empty());

    device.replug();
    manager.connect(&cancel).await.unwrap();
    assert_eq!(peripheral.snapshot().handshakes, 2);
    assert_eq!(manager.stats().sessions_established, 2);
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let (device, peripheral) = SimulatedPeripheral::attach(PeripheralConfig::default());
    let (manager, _provider, _bridge) = create_test_manager(device);
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(manager.run(cancel.clone()));
    let connected = test_utils::wait_for(
        || peripheral.snapshot().handshakes > 0,
        Duration::from_secs(2),
    )
    .await;
    assert!(connected);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("manager should stop within the teardown deadline")
        .unwrap();
    assert!(result.is_ok());
}
