//! Session task tests
//!
//! Drives the telemetry producers, the command consumer, the icon worker and the
//! single-exchange loop under the supervisor against the in-memory device.

use deskdock_core::{
    DeskdockError, FastTelemetry, OutboundMessage, SessionError, SessionMode, TelemetryConfig,
};
use deskdock_runtime::testing::{
    AckMode, DeviceBehavior, MemoryDevice, PeripheralConfig, SimulatedPeripheral,
};
use deskdock_runtime::{
    session_tasks, CommandConsumerTask, FastTelemetryTask, SessionEnd, SessionSupervisor,
    SingleExchangeTask, SlowTelemetryTask,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

mod test_utils;
use test_utils::{create_test_bridge, create_test_session, fast_config, wait_for};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

/// Answers the first `remaining` host writes with a brightness request
struct RepliesThenGoesQuiet {
    remaining: u32,
}

impl DeviceBehavior for RepliesThenGoesQuiet {
    fn on_host_bytes(&mut self, _bytes: &[u8]) -> Vec<u8> {
        if self.remaining == 0 {
            return Vec::new();
        }
        self.remaining -= 1;
        b"{\"setBrightness\": 70}\n".to_vec()
    }
}

fn parsed_lines(device: &MemoryDevice) -> Vec<Value> {
    device
        .host_lines()
        .iter()
        .map(|line| {
            serde_json::from_str(line).unwrap_or_else(|e| panic!("corrupt line {line:?}: {e}"))
        })
        .collect()
}

/// `haystack` with every occurrence of `needle` cut out
fn without_all(haystack: &[u8], needle: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut at = 0;
    while at < haystack.len() {
        if haystack[at..].starts_with(needle) {
            at += needle.len();
        } else {
            out.push(haystack[at]);
            at += 1;
        }
    }
    out
}

// ----------------------------------------------------------------------------
// Shared Channel Writes
// ----------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_never_interleave() {
    let device = MemoryDevice::new();
    let session = create_test_session(&device);

    let mut producers = Vec::new();
    for producer in 0..8u8 {
        let session = Arc::clone(&session);
        producers.push(tokio::spawn(async move {
            for i in 0..50u8 {
                let message = OutboundMessage::FastTelemetry(FastTelemetry {
                    volume: producer,
                    brightness: i,
                });
                session.channel.send(&message).await.unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    let lines = parsed_lines(&device);
    assert_eq!(lines.len(), 400);
    for producer in 0..8u64 {
        let sequence: Vec<u64> = lines
            .iter()
            .filter(|v| v["volume"].as_u64() == Some(producer))
            .map(|v| v["brightness"].as_u64().unwrap())
            .collect();
        assert_eq!(sequence, (0..50).collect::<Vec<u64>>());
    }
    assert_eq!(device.flush_count(), 400);
}

#[tokio::test]
async fn test_telemetry_tasks_write_whole_lines() {
    let bridge = create_test_bridge(fast_config());
    let device = MemoryDevice::new();
    let session = create_test_session(&device);

    let mut supervisor = SessionSupervisor::new(Arc::clone(&session));
    supervisor.spawn(Box::new(SlowTelemetryTask::new(Arc::clone(&bridge.services))));
    supervisor.spawn(Box::new(FastTelemetryTask::new(Arc::clone(&bridge.services))));
    let run = tokio::spawn(supervisor.run());

    tokio::time::sleep(Duration::from_millis(300)).await;
    session.cancel_token().cancel();
    let end = run.await.unwrap();
    assert!(matches!(end, SessionEnd::Cancelled));

    let lines = parsed_lines(&device);
    let slow: Vec<&Value> = lines.iter().filter(|v| v.get("OSName").is_some()).collect();
    let fast: Vec<&Value> = lines.iter().filter(|v| v.get("volume").is_some()).collect();
    assert!(slow.len() >= 3, "{} slow lines", slow.len());
    assert!(fast.len() > slow.len());
    assert_eq!(slow[0]["cpuUsage"], 12);
    assert_eq!(slow[0]["time"], "18:47:12");
    assert_eq!(slow[0]["date"], "22-08-25");
    assert_eq!(fast[0]["volume"], 35);
    assert_eq!(fast[0]["brightness"], 80);
}

#[tokio::test]
async fn test_failing_getters_report_zero() {
    let bridge = create_test_bridge(fast_config());
    bridge.controls.set_fail_reads(true);
    let device = MemoryDevice::new();
    let session = create_test_session(&device);

    let mut supervisor = SessionSupervisor::new(Arc::clone(&session));
    supervisor.spawn(Box::new(FastTelemetryTask::new(Arc::clone(&bridge.services))));
    let run = tokio::spawn(supervisor.run());

    assert!(wait_for(|| !device.host_lines().is_empty(), Duration::from_secs(1)).await);
    session.cancel_token().cancel();
    run.await.unwrap();

    let first = &parsed_lines(&device)[0];
    assert_eq!(first["volume"], 0);
    assert_eq!(first["brightness"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_icon_transfers_stay_intact_alongside_telemetry() {
    let bridge = create_test_bridge(fast_config());
    let names = ["Blender", "Code", "Discord", "Spotify", "vlc"];
    let mut payloads = Vec::new();
    for name in names {
        payloads.push(bridge.register_app(name).await);
    }
    // Every app gets the same solid icon
    let payload = payloads[0].clone();
    assert!(payloads.iter().all(|p| *p == payload));

    let (device, log) = SimulatedPeripheral::attach(PeripheralConfig {
        ack: AckMode::Verify,
        ..PeripheralConfig::default()
    });
    let session = create_test_session(&device);
    let tasks = session_tasks(&bridge.services);
    assert_eq!(tasks.len(), 4);
    let mut supervisor = SessionSupervisor::new(Arc::clone(&session));
    for task in tasks {
        supervisor.spawn(task);
    }
    let run = tokio::spawn(supervisor.run());

    let delivered = wait_for(
        || log.snapshot().icons.len() >= names.len(),
        Duration::from_secs(5),
    )
    .await;
    assert!(delivered, "{} icons received", log.snapshot().icons.len());

    // The command consumer is still serving the device after the transfers
    device.push_line("{\"command\": \"spotify\"}");
    let dispatcher = Arc::clone(&bridge.dispatcher);
    assert!(wait_for(|| !dispatcher.commands().is_empty(), Duration::from_secs(2)).await);

    session.cancel_token().cancel();
    assert!(matches!(run.await.unwrap(), SessionEnd::Cancelled));

    let snapshot = log.snapshot();
    assert_eq!(snapshot.icons.len(), names.len());
    for icon in &snapshot.icons {
        assert!(icon.accepted, "{} was rejected", icon.name);
        assert_eq!(icon.payload, payload, "{} payload corrupted", icon.name);
    }
    let received: BTreeSet<&str> = snapshot.icons.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(received, names.into_iter().collect::<BTreeSet<_>>());

    // With the payloads cut out, the rest of the stream is whole JSON lines
    let text = without_all(&device.host_bytes(), &payload);
    let lines: Vec<Value> = String::from_utf8(text)
        .unwrap()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).unwrap_or_else(|e| panic!("corrupt line {line:?}: {e}"))
        })
        .collect();
    assert!(lines.iter().any(|v| v.get("OSName").is_some()));
    assert!(lines.iter().any(|v| v.get("volume").is_some()));
    assert_eq!(lines.iter().filter(|v| v.get("new_app").is_some()).count(), names.len());
    assert_eq!(lines.iter().filter(|v| v.get("done").is_some()).count(), names.len());
}

// ----------------------------------------------------------------------------
// Command Consumer
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_lines_leave_consumer_running() {
    let bridge = create_test_bridge(fast_config());
    bridge.dispatcher.fail_on("broken_action");
    let device = MemoryDevice::new();
    device.push_line("not json at all");
    device.push_line("{\"setVolume\": 40");
    device.push_line("[1, 2, 3]");
    device.push_line("{\"command\": \"broken_action\"}");
    device.push_line("{\"unknown\": true}");
    device.push_line("{\"setVolume\": 40, \"setBrightness\": 65.6}");
    device.push_line("{\"setVolume\": \"loud\"}");
    device.push_line("{\"command\": \"spotify\"}");

    let session = create_test_session(&device);
    let mut supervisor = SessionSupervisor::new(Arc::clone(&session));
    supervisor.spawn(Box::new(CommandConsumerTask::new(Arc::clone(&bridge.services))));
    let run = tokio::spawn(supervisor.run());

    let dispatcher = Arc::clone(&bridge.dispatcher);
    assert!(wait_for(|| dispatcher.commands().len() == 2, Duration::from_secs(2)).await);
    assert!(session.is_connected());

    // Lines arriving later are still handled
    device.push_line("{\"setBrightness\": 10}");
    let controls = Arc::clone(&bridge.controls);
    assert!(wait_for(|| controls.brightness_sets().len() == 2, Duration::from_secs(2)).await);

    session.cancel_token().cancel();
    assert!(matches!(run.await.unwrap(), SessionEnd::Cancelled));

    assert_eq!(
        bridge.dispatcher.commands(),
        vec!["broken_action".to_string(), "spotify".to_string()]
    );
    assert_eq!(bridge.controls.volume_sets(), vec![40]);
    assert_eq!(bridge.controls.brightness_sets(), vec![66, 10]);
}

#[tokio::test]
async fn test_rejected_lines_touch_nothing() {
    let bridge = create_test_bridge(fast_config());
    let rejected = [
        "not json at all",
        "{\"setVolume\": 40",
        "[1, 2, 3]",
        "\"plain string\"",
        "{\"unknown\": true}",
        "{\"setVolume\": \"loud\"}",
        "{\"setBrightness\": null}",
        "{\"command\": 5}",
    ];
    let device = MemoryDevice::new();
    for line in rejected {
        device.push_line(line);
    }

    let session = create_test_session(&device);
    let mut supervisor = SessionSupervisor::new(Arc::clone(&session));
    supervisor.spawn(Box::new(CommandConsumerTask::new(Arc::clone(&bridge.services))));
    let run = tokio::spawn(supervisor.run());

    let channel = Arc::clone(&session.channel);
    let consumed = wait_for(
        || channel.stats().lines_read == rejected.len() as u64,
        Duration::from_secs(2),
    )
    .await;
    assert!(consumed, "{} lines read", channel.stats().lines_read);
    // One more poll cycle so the last line is fully handled
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(session.is_connected());

    session.cancel_token().cancel();
    assert!(matches!(run.await.unwrap(), SessionEnd::Cancelled));

    assert!(bridge.controls.volume_sets().is_empty());
    assert!(bridge.controls.brightness_sets().is_empty());
    assert!(bridge.dispatcher.commands().is_empty());
    assert!(bridge.services.registry.keys().await.is_empty());
    assert!(bridge.services.sync.known().await.is_empty());
}

// ----------------------------------------------------------------------------
// Single Exchange Mode
// ----------------------------------------------------------------------------

fn single_exchange_config() -> deskdock_core::BridgeConfig {
    let config = fast_config();
    let telemetry = TelemetryConfig {
        slow_interval_ms: 40,
        command_poll_ms: 20,
        ..config.telemetry.clone()
    }
    .with_mode(SessionMode::SingleExchange)
    .with_idle_timeout(Duration::from_millis(300));
    config.with_telemetry(telemetry)
}

#[tokio::test]
async fn test_single_exchange_ends_on_idle_timeout() {
    let bridge = create_test_bridge(single_exchange_config());
    let device = MemoryDevice::with_behavior(RepliesThenGoesQuiet { remaining: 2 });
    let session = create_test_session(&device);

    let tasks = session_tasks(&bridge.services);
    assert_eq!(tasks.len(), 1);
    let mut supervisor = SessionSupervisor::new(Arc::clone(&session));
    for task in tasks {
        supervisor.spawn(task);
    }

    let end = tokio::time::timeout(Duration::from_secs(3), supervisor.run())
        .await
        .expect("idle session should end");
    match end {
        SessionEnd::TaskFailed { task, error } => {
            assert_eq!(task, "single_exchange");
            assert!(matches!(
                error,
                DeskdockError::Session(SessionError::IdleTimeout { duration_ms: 300 })
            ));
        }
        other => panic!("unexpected end {other:?}"),
    }
    assert_eq!(bridge.controls.brightness_sets(), vec![70, 70]);
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_single_exchange_waits_for_first_line() {
    let bridge = create_test_bridge(single_exchange_config());
    let device = MemoryDevice::new();
    let session = create_test_session(&device);

    let mut supervisor = SessionSupervisor::new(Arc::clone(&session));
    supervisor.spawn(Box::new(SingleExchangeTask::new(Arc::clone(&bridge.services))));
    let run = tokio::spawn(supervisor.run());

    // Three idle periods of silence before the device ever spoke
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(!run.is_finished());
    assert!(session.is_connected());

    session.cancel_token().cancel();
    assert!(matches!(run.await.unwrap(), SessionEnd::Cancelled));
    assert!(parsed_lines(&device).iter().all(|v| v.get("OSName").is_some()));
}
