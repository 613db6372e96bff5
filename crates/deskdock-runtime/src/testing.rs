//! In-memory link, simulated peripheral and fake collaborators
//!
//! Compiled for this crate's tests and, through the `testing` feature, for downstream
//! crates that want to drive a bridge without hardware. [`MemoryDevice`] is a byte pipe;
//! give it a [`DeviceBehavior`] such as [`SimulatedPeripheral`] and it answers the host
//! the way the real firmware does.

use deskdock_core::{
    payload_crc, AppEnumerator, CollaboratorError, CommandDispatcher, IconExtractor, IconImage,
    ObservedApp, SerialConfig, SystemControls, TransportError,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::link::{DeviceProvider, LinkPair, LinkReader, LinkWriter};
use crate::system::{SystemSample, TelemetrySource};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ----------------------------------------------------------------------------
// Memory Device
// ----------------------------------------------------------------------------

/// Reacts to bytes written by the host
pub trait DeviceBehavior: Send {
    /// Consume one host write; returns bytes to queue for the host
    fn on_host_bytes(&mut self, bytes: &[u8]) -> Vec<u8>;
}

struct DeviceState {
    to_host: VecDeque<u8>,
    from_host: Vec<u8>,
    flushes: usize,
    unplugged: bool,
    behavior: Option<Box<dyn DeviceBehavior>>,
}

/// In-memory peripheral end of a link
#[derive(Clone)]
pub struct MemoryDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MemoryDevice {
    /// Device that never answers on its own
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                to_host: VecDeque::new(),
                from_host: Vec::new(),
                flushes: 0,
                unplugged: false,
                behavior: None,
            })),
        }
    }

    /// Device driven by `behavior`
    pub fn with_behavior<B: DeviceBehavior + 'static>(behavior: B) -> Self {
        let device = Self::new();
        lock(&device.state).behavior = Some(Box::new(behavior));
        device
    }

    /// Open both halves of the link under the name `port`
    pub fn link(&self, port: &str) -> LinkPair {
        LinkPair {
            port: port.to_string(),
            reader: Box::new(MemoryReader {
                state: Arc::clone(&self.state),
            }),
            writer: Box::new(MemoryWriter {
                state: Arc::clone(&self.state),
            }),
        }
    }

    /// Queue raw bytes for the host
    pub fn push_to_host(&self, bytes: &[u8]) {
        lock(&self.state).to_host.extend(bytes.iter().copied());
    }

    /// Queue one newline-terminated line for the host
    pub fn push_line(&self, line: &str) {
        let mut state = lock(&self.state);
        state.to_host.extend(line.as_bytes().iter().copied());
        state.to_host.push_back(b'\n');
    }

    /// Everything the host has written
    pub fn host_bytes(&self) -> Vec<u8> {
        lock(&self.state).from_host.clone()
    }

    /// Complete lines the host has written
    pub fn host_lines(&self) -> Vec<String> {
        let bytes = self.host_bytes();
        let mut lines: Vec<String> = bytes
            .split(|b| *b == b'\n')
            .map(|l| String::from_utf8_lossy(l).to_string())
            .collect();
        // Trailing fragment after the last newline
        lines.pop();
        lines
    }

    pub fn flush_count(&self) -> usize {
        lock(&self.state).flushes
    }

    /// Make every further read and write fail
    pub fn unplug(&self) {
        lock(&self.state).unplugged = true;
    }

    /// Undo [`unplug`](Self::unplug)
    pub fn replug(&self) {
        let mut state = lock(&self.state);
        state.unplugged = false;
        state.to_host.clear();
    }
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryReader {
    state: Arc<Mutex<DeviceState>>,
}

impl LinkReader for MemoryReader {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.unplugged {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        let n = buf.len().min(state.to_host.len());
        for (slot, byte) in buf.iter_mut().zip(state.to_host.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        let state = lock(&self.state);
        if state.unplugged {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        Ok(state.to_host.len())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        lock(&self.state).to_host.clear();
        Ok(())
    }
}

struct MemoryWriter {
    state: Arc<Mutex<DeviceState>>,
}

impl LinkWriter for MemoryWriter {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        if state.unplugged {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        state.from_host.extend_from_slice(bytes);
        if let Some(behavior) = state.behavior.as_mut() {
            let reply = behavior.on_host_bytes(bytes);
            state.to_host.extend(reply);
        }
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.unplugged {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        state.flushes += 1;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Simulated Peripheral
// ----------------------------------------------------------------------------

/// How the simulated firmware acknowledges icon payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Never sends `icon_ack`
    Silent,
    /// Acks every payload, reporting `crc_error` on a checksum mismatch
    Verify,
    /// Reports `crc_error` for the first `n` payloads regardless of content
    RejectFirst(u32),
}

/// Behavior knobs of [`SimulatedPeripheral`]
#[derive(Debug, Clone)]
pub struct PeripheralConfig {
    pub host_token: String,
    pub device_token: String,
    pub answer_handshake: bool,
    /// Whether announces are answered with the ready status
    pub signal_ready: bool,
    pub ack: AckMode,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        let serial = SerialConfig::default();
        Self {
            host_token: serial.host_ready_token,
            device_token: serial.device_ready_token,
            answer_handshake: true,
            signal_ready: true,
            ack: AckMode::Silent,
        }
    }
}

/// An icon payload the simulated firmware assembled
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedIcon {
    pub name: String,
    pub payload: Vec<u8>,
    pub announced_crc: u32,
    pub accepted: bool,
}

/// What the simulated firmware has seen
#[derive(Debug, Clone, Default)]
pub struct PeripheralLog {
    pub handshakes: u32,
    /// JSON lines other than the icon protocol
    pub lines: Vec<Value>,
    pub announces: Vec<Value>,
    pub icons: Vec<ReceivedIcon>,
}

impl PeripheralLog {
    /// Telemetry lines carrying `field`
    pub fn lines_with(&self, field: &str) -> Vec<&Value> {
        self.lines.iter().filter(|v| v.get(field).is_some()).collect()
    }
}

struct PendingIcon {
    name: String,
    crc: u32,
    remaining: usize,
    payload: Vec<u8>,
}

/// Firmware model: handshake, telemetry sink and icon receiver
pub struct SimulatedPeripheral {
    config: PeripheralConfig,
    buffer: Vec<u8>,
    pending: Option<PendingIcon>,
    awaiting_done: Option<PendingIcon>,
    rejected: u32,
    log: Arc<Mutex<PeripheralLog>>,
}

impl SimulatedPeripheral {
    pub fn new(config: PeripheralConfig) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            pending: None,
            awaiting_done: None,
            rejected: 0,
            log: Arc::new(Mutex::new(PeripheralLog::default())),
        }
    }

    /// Shared view of the log that stays valid after the peripheral moves into a device
    pub fn log_handle(&self) -> PeripheralHandle {
        PeripheralHandle {
            log: Arc::clone(&self.log),
        }
    }

    /// Device plus log handle in one step
    pub fn attach(config: PeripheralConfig) -> (MemoryDevice, PeripheralHandle) {
        let peripheral = Self::new(config);
        let handle = peripheral.log_handle();
        (MemoryDevice::with_behavior(peripheral), handle)
    }

    fn handle_line(&mut self, line: &[u8], reply: &mut Vec<u8>) {
        let text = String::from_utf8_lossy(line);
        let Ok(value) = serde_json::from_str::<Value>(text.trim()) else {
            return;
        };

        if let Some(name) = value.get("new_app").and_then(Value::as_str) {
            let width = value.get("width").and_then(Value::as_u64).unwrap_or(0) as usize;
            let height = value.get("height").and_then(Value::as_u64).unwrap_or(0) as usize;
            let crc = value
                .get("crc")
                .and_then(Value::as_u64)
                .and_then(|c| u32::try_from(c).ok())
                .unwrap_or(0);
            let name = name.to_string();
            lock(&self.log).announces.push(value);

            if self.config.signal_ready {
                self.pending = Some(PendingIcon {
                    name,
                    crc,
                    remaining: 9 + width * height * 2,
                    payload: Vec::new(),
                });
                reply.extend_from_slice(b"{\"status\": \"waiting_for_icon\"}\n");
            }
            return;
        }

        if value.get("done").is_some() {
            if let Some(icon) = self.awaiting_done.take() {
                self.finish_icon(icon, reply);
            }
            return;
        }

        lock(&self.log).lines.push(value);
    }

    fn finish_icon(&mut self, icon: PendingIcon, reply: &mut Vec<u8>) {
        let crc = payload_crc(&icon.payload);
        let matches = crc == icon.crc;
        let forced_reject = match self.config.ack {
            AckMode::RejectFirst(n) if self.rejected < n => {
                self.rejected += 1;
                true
            }
            _ => false,
        };
        let accepted = matches && !forced_reject;

        lock(&self.log).icons.push(ReceivedIcon {
            name: icon.name,
            payload: icon.payload,
            announced_crc: icon.crc,
            accepted,
        });

        if self.config.ack != AckMode::Silent {
            let verdict = if accepted { "ok" } else { "crc_error" };
            let ack = json!({"icon_ack": verdict, "crc": crc});
            reply.extend_from_slice(ack.to_string().as_bytes());
            reply.push(b'\n');
        }
    }
}

impl DeviceBehavior for SimulatedPeripheral {
    fn on_host_bytes(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.buffer.extend_from_slice(bytes);
        let mut reply = Vec::new();

        loop {
            if let Some(icon) = self.pending.as_mut() {
                let take = icon.remaining.min(self.buffer.len());
                icon.payload.extend(self.buffer.drain(..take));
                icon.remaining -= take;
                if icon.remaining > 0 {
                    break;
                }
                self.awaiting_done = self.pending.take();
                continue;
            }

            let token = self.config.host_token.as_bytes();
            if self.config.answer_handshake && !token.is_empty() {
                if let Some(pos) = find(&self.buffer, token) {
                    self.buffer.drain(..pos + token.len());
                    lock(&self.log).handshakes += 1;
                    reply.extend_from_slice(self.config.device_token.as_bytes());
                    reply.extend_from_slice(b"\r\n");
                    continue;
                }
            }

            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle_line(&line, &mut reply);
        }

        reply
    }
}

/// Read access to a [`SimulatedPeripheral`]'s log
#[derive(Clone)]
pub struct PeripheralHandle {
    log: Arc<Mutex<PeripheralLog>>,
}

impl PeripheralHandle {
    pub fn snapshot(&self) -> PeripheralLog {
        lock(&self.log).clone()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ----------------------------------------------------------------------------
// Memory Provider
// ----------------------------------------------------------------------------

/// [`DeviceProvider`] serving one [`MemoryDevice`]
pub struct MemoryProvider {
    device: MemoryDevice,
    port: String,
    vendor_id: u16,
    product_id: u16,
    attached: AtomicBool,
    fail_open: AtomicBool,
    opens: AtomicU32,
}

impl MemoryProvider {
    /// Provider exposing `device` under the default USB ids
    pub fn new(device: MemoryDevice) -> Self {
        let serial = SerialConfig::default();
        Self {
            device,
            port: "mem0".to_string(),
            vendor_id: serial.vendor_id,
            product_id: serial.product_id,
            attached: AtomicBool::new(true),
            fail_open: AtomicBool::new(false),
            opens: AtomicU32::new(0),
        }
    }

    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn device(&self) -> &MemoryDevice {
        &self.device
    }
}

impl DeviceProvider for MemoryProvider {
    fn discover(&self, vendor_id: u16, product_id: u16) -> Result<Option<String>, TransportError> {
        let matches = vendor_id == self.vendor_id && product_id == self.product_id;
        Ok((matches && self.attached.load(Ordering::SeqCst)).then(|| self.port.clone()))
    }

    fn open(&self, port: &str, _config: &SerialConfig) -> Result<LinkPair, TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::OpenFailed {
                port: port.to_string(),
                reason: "access denied".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.device.link(port))
    }
}

// ----------------------------------------------------------------------------
// Fake Collaborators
// ----------------------------------------------------------------------------

/// [`SystemControls`] that stores values in memory and records every set call
#[derive(Debug, Default)]
pub struct RecordingControls {
    volume: Mutex<u8>,
    brightness: Mutex<u8>,
    volume_sets: Mutex<Vec<i64>>,
    brightness_sets: Mutex<Vec<i64>>,
    fail_reads: AtomicBool,
}

impl RecordingControls {
    pub fn new(volume: u8, brightness: u8) -> Self {
        Self {
            volume: Mutex::new(volume),
            brightness: Mutex::new(brightness),
            ..Self::default()
        }
    }

    /// Make the getters fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn volume_sets(&self) -> Vec<i64> {
        lock(&self.volume_sets).clone()
    }

    pub fn brightness_sets(&self) -> Vec<i64> {
        lock(&self.brightness_sets).clone()
    }

    fn check_read(&self, operation: &str) -> Result<(), CollaboratorError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Failed {
                operation: operation.to_string(),
                reason: "no mixer".to_string(),
            });
        }
        Ok(())
    }
}

impl SystemControls for RecordingControls {
    fn volume(&self) -> Result<u8, CollaboratorError> {
        self.check_read("volume")?;
        Ok(*lock(&self.volume))
    }

    fn set_volume(&self, level: i64) -> Result<(), CollaboratorError> {
        lock(&self.volume_sets).push(level);
        *lock(&self.volume) = level.clamp(0, 100) as u8;
        Ok(())
    }

    fn brightness(&self) -> Result<u8, CollaboratorError> {
        self.check_read("brightness")?;
        Ok(*lock(&self.brightness))
    }

    fn set_brightness(&self, level: i64) -> Result<(), CollaboratorError> {
        lock(&self.brightness_sets).push(level);
        *lock(&self.brightness) = level.clamp(0, 100) as u8;
        Ok(())
    }
}

/// [`CommandDispatcher`] that records commands; one name may be set to fail
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    commands: Mutex<Vec<String>>,
    failing: Mutex<Option<String>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, command: &str) {
        *lock(&self.failing) = Some(command.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }
}

impl CommandDispatcher for RecordingDispatcher {
    fn dispatch(&self, command: &str) -> Result<(), CollaboratorError> {
        lock(&self.commands).push(command.to_string());
        if lock(&self.failing).as_deref() == Some(command) {
            return Err(CollaboratorError::Failed {
                operation: format!("command {command}"),
                reason: "launcher exited with status 1".to_string(),
            });
        }
        Ok(())
    }
}

/// [`AppEnumerator`] returning a settable list
#[derive(Debug, Default)]
pub struct StaticEnumerator {
    apps: Mutex<Vec<ObservedApp>>,
}

impl StaticEnumerator {
    pub fn new(apps: Vec<ObservedApp>) -> Self {
        Self {
            apps: Mutex::new(apps),
        }
    }

    pub fn set_apps(&self, apps: Vec<ObservedApp>) {
        *lock(&self.apps) = apps;
    }
}

impl AppEnumerator for StaticEnumerator {
    fn list_user_applications(&self) -> Result<Vec<ObservedApp>, CollaboratorError> {
        Ok(lock(&self.apps).clone())
    }
}

/// [`IconExtractor`] producing a solid tile; paths containing `broken` fail
#[derive(Debug, Clone, Copy)]
pub struct SolidIconExtractor {
    pub rgb: [u8; 3],
}

impl Default for SolidIconExtractor {
    fn default() -> Self {
        Self {
            rgb: [0x20, 0x80, 0xE0],
        }
    }
}

impl IconExtractor for SolidIconExtractor {
    fn extract_icon(
        &self,
        exe_path: &Path,
        width: u16,
        height: u16,
    ) -> Result<IconImage, CollaboratorError> {
        if exe_path.to_string_lossy().contains("broken") {
            return Err(CollaboratorError::Failed {
                operation: "extract_icon".to_string(),
                reason: format!("no icon resource in {}", exe_path.display()),
            });
        }
        Ok(IconImage::solid(width, height, self.rgb))
    }
}

/// [`TelemetrySource`] returning one fixed sample
#[derive(Debug, Clone)]
pub struct FixedTelemetry {
    pub sample: SystemSample,
}

impl Default for FixedTelemetry {
    fn default() -> Self {
        Self {
            sample: SystemSample {
                os_name: "Linux".to_string(),
                cpu_usage: 12,
                cpu_temp: 45,
                mem_total_mb: 16_000,
                mem_used_mb: 6_000,
                battery_percent: 100,
                power_in: true,
            },
        }
    }
}

impl TelemetrySource for FixedTelemetry {
    fn sample(&self) -> Result<SystemSample, CollaboratorError> {
        Ok(self.sample.clone())
    }
}

/// Observed app with a conventional executable path
pub fn observed_app(pid: u32, process_name: &str) -> ObservedApp {
    ObservedApp {
        pid,
        exe_path: Path::new("/opt/apps").join(process_name),
        display_name: process_name.to_string(),
    }
}
