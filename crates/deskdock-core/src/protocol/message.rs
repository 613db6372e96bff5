//! Line-oriented message codec
//!
//! Outbound messages serialize to a single JSON object followed by `\n`. Inbound lines are
//! decoded once into [`InboundMessage`]; the device does not tag its messages, so the
//! variant is chosen from the fields present.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{DecodeError, DeskdockResult};

// ----------------------------------------------------------------------------
// Outbound Messages
// ----------------------------------------------------------------------------

/// System snapshot sent on the slow cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowTelemetry {
    #[serde(rename = "OSName")]
    pub os_name: String,
    pub time: String,
    pub date: String,
    #[serde(rename = "cpuUsage")]
    pub cpu_usage: u8,
    #[serde(rename = "cpuTemp")]
    pub cpu_temp: i32,
    /// Total memory in MB
    #[serde(rename = "memMax")]
    pub mem_max: u64,
    /// Used memory in MB
    #[serde(rename = "MemUsage")]
    pub mem_usage: u64,
    #[serde(rename = "batteryPercent")]
    pub battery_percent: u8,
    #[serde(rename = "powerIn")]
    pub power_in: bool,
}

impl SlowTelemetry {
    /// Device-facing `date` and `time` strings for a local timestamp
    pub fn clock_fields(now: NaiveDateTime) -> (String, String) {
        (
            now.format("%d-%m-%y").to_string(),
            now.format("%H:%M:%S").to_string(),
        )
    }
}

/// Audio volume and display brightness, both 0-100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastTelemetry {
    pub volume: u8,
    pub brightness: u8,
}

/// Announces an icon payload before the device acknowledges readiness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IconAnnounce {
    pub new_app: String,
    pub height: u16,
    pub width: u16,
    /// CRC-32 of the complete payload
    pub crc: u32,
    pub score: f64,
}

/// Messages the host writes to the device
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    SlowTelemetry(SlowTelemetry),
    FastTelemetry(FastTelemetry),
    IconAnnounce(IconAnnounce),
    IconDone,
}

impl OutboundMessage {
    /// Encode as one newline-terminated JSON line
    pub fn to_line(&self) -> DeskdockResult<String> {
        let mut line = match self {
            OutboundMessage::SlowTelemetry(msg) => serde_json::to_string(msg)?,
            OutboundMessage::FastTelemetry(msg) => serde_json::to_string(msg)?,
            OutboundMessage::IconAnnounce(msg) => serde_json::to_string(msg)?,
            OutboundMessage::IconDone => serde_json::to_string(&serde_json::json!({"done": "done"}))?,
        };
        line.push('\n');
        Ok(line)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::SlowTelemetry(_) => "slow_telemetry",
            OutboundMessage::FastTelemetry(_) => "fast_telemetry",
            OutboundMessage::IconAnnounce(_) => "icon_announce",
            OutboundMessage::IconDone => "icon_done",
        }
    }
}

// ----------------------------------------------------------------------------
// Inbound Messages
// ----------------------------------------------------------------------------

/// Requested OS setting changes; either or both may be present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettingsChange {
    pub volume: Option<i64>,
    pub brightness: Option<i64>,
}

impl SettingsChange {
    pub fn is_empty(&self) -> bool {
        self.volume.is_none() && self.brightness.is_none()
    }
}

/// Device verdict on a received icon payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconAck {
    pub accepted: bool,
    /// Checksum the device computed, when it reports one
    pub crc: Option<u32>,
}

impl IconAck {
    /// Whether the device accepted a payload with checksum `expected`
    pub fn confirms(&self, expected: u32) -> bool {
        self.accepted && self.crc.map_or(true, |crc| crc == expected)
    }
}

/// Messages the device writes to the host
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A keyboard/app-launch action keyed by name
    Command { name: String },
    /// `setVolume` / `setBrightness`
    Settings(SettingsChange),
    /// Device is waiting for the announced icon payload
    IconReady,
    /// Device verdict after `done`
    IconAck(IconAck),
    /// Valid JSON object with no recognized fields
    Unrecognized(Value),
}

impl InboundMessage {
    /// Decode one inbound line. `ready_marker` identifies icon readiness both as a
    /// `status` value and as a bare token in non-JSON lines.
    pub fn decode(line: &str, ready_marker: &str) -> Result<Self, DecodeError> {
        let line = line.trim();
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(source) => {
                if !ready_marker.is_empty() && line.contains(ready_marker) {
                    return Ok(InboundMessage::IconReady);
                }
                return Err(DecodeError::InvalidJson {
                    line: line.to_string(),
                    source,
                });
            }
        };

        match value {
            Value::Object(map) => Ok(Self::from_object(map, ready_marker)),
            Value::String(s) if !ready_marker.is_empty() && s.contains(ready_marker) => {
                Ok(InboundMessage::IconReady)
            }
            _ => Err(DecodeError::NotAnObject {
                line: line.to_string(),
            }),
        }
    }

    fn from_object(map: Map<String, Value>, ready_marker: &str) -> Self {
        if let Some(command) = map.get("command") {
            return match command.as_str() {
                Some(name) => InboundMessage::Command {
                    name: name.to_string(),
                },
                None => InboundMessage::Unrecognized(Value::Object(map)),
            };
        }

        if map.get("status").and_then(Value::as_str) == Some(ready_marker) {
            return InboundMessage::IconReady;
        }

        if let Some(verdict) = map.get("icon_ack").and_then(Value::as_str) {
            let crc = map
                .get("crc")
                .and_then(Value::as_u64)
                .and_then(|crc| u32::try_from(crc).ok());
            return InboundMessage::IconAck(IconAck {
                accepted: verdict == "ok",
                crc,
            });
        }

        let settings = SettingsChange {
            volume: map.get("setVolume").and_then(numeric_setting),
            brightness: map.get("setBrightness").and_then(numeric_setting),
        };
        if !settings.is_empty() {
            return InboundMessage::Settings(settings);
        }

        InboundMessage::Unrecognized(Value::Object(map))
    }
}

fn numeric_setting(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
}
