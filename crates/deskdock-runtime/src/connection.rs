//! Connection management
//!
//! The [`ConnectionManager`] owns the reconnect loop: find the peripheral, open it, wait
//! for it to settle, exchange ready tokens, run one supervised session, and start over.
//! Every step is reported to the linear [`ConnectionState`] machine, so the manager's
//! state always names the phase it is in.

use deskdock_core::{
    ConnectionEvent, ConnectionState, DeskdockError, DeskdockResult, SessionError, SessionMode,
    TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::SharedChannel;
use crate::link::DeviceProvider;
use crate::session::{BridgeServices, SessionContext, SessionInfo};
use crate::supervisor::{SessionEnd, SessionSupervisor};
use crate::tasks::{
    sleep_or_cancel, CommandConsumerTask, FastTelemetryTask, IconSyncWorker, SessionTask,
    SingleExchangeTask, SlowTelemetryTask,
};

/// Poll period while waiting for the device-ready token
const HANDSHAKE_POLL: Duration = Duration::from_millis(10);

// ----------------------------------------------------------------------------
// Connection Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub discovery_attempts: u64,
    pub handshake_failures: u64,
    pub sessions_established: u64,
    pub sessions_ended: u64,
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// Discovers the peripheral and runs one session at a time
pub struct ConnectionManager {
    provider: Arc<dyn DeviceProvider>,
    services: Arc<BridgeServices>,
    state: ConnectionState,
    stats: ConnectionStats,
}

impl ConnectionManager {
    pub fn new(provider: Arc<dyn DeviceProvider>, services: Arc<BridgeServices>) -> Self {
        Self {
            provider,
            services,
            state: ConnectionState::new_disconnected(),
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Reconnect until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> DeskdockResult<()> {
        info!("Connection manager started");

        while !cancel.is_cancelled() {
            match self.connect(&cancel).await {
                Ok(channel) => {
                    let end = self.run_session(channel, &cancel).await;
                    debug!("Session finished: {}", end.reason());
                }
                Err(e) if cancel.is_cancelled() => {
                    debug!("Connection attempt interrupted: {}", e);
                    break;
                }
                Err(DeskdockError::Transport(TransportError::DeviceNotFound { .. })) => {}
                Err(e) => warn!("Connection attempt failed: {}", e),
            }

            let backoff = self.services.config.serial.discovery_backoff();
            if !sleep_or_cancel(&cancel, backoff).await {
                break;
            }
        }

        self.apply(ConnectionEvent::Cancel);
        info!(
            "Connection manager stopped after {} session(s)",
            self.stats.sessions_established
        );
        Ok(())
    }

    /// One discover/open/settle/handshake attempt.
    ///
    /// On success the manager is `Connected` and the returned channel is ready for
    /// session tasks; on failure it is back in `Discovering` or `Disconnected`.
    pub async fn connect(&mut self, cancel: &CancellationToken) -> DeskdockResult<Arc<SharedChannel>> {
        if !matches!(self.state, ConnectionState::Discovering(_)) {
            self.apply(ConnectionEvent::StartDiscovery);
        }

        let port = match self.discover().await {
            Ok(port) => port,
            Err(e) => {
                self.apply(ConnectionEvent::DeviceMissing);
                return Err(e);
            }
        };

        let link = match self.open(&port).await {
            Ok(link) => link,
            Err(e) => {
                self.apply(ConnectionEvent::OpenFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };
        info!("Opened {}", port);
        self.apply(ConnectionEvent::DeviceOpened { port: port.clone() });

        let serial = &self.services.config.serial;
        let channel = Arc::new(SharedChannel::new(link, serial.max_line_len));
        if !sleep_or_cancel(cancel, serial.settle_delay()).await {
            self.apply(ConnectionEvent::Cancel);
            return Err(SessionError::Cancelled.into());
        }

        match self.handshake(&channel, cancel).await {
            Ok(()) => {
                self.stats.sessions_established += 1;
                self.apply(ConnectionEvent::HandshakeSucceeded {
                    at: self.services.clock.now(),
                });
                info!("Handshake with {} complete", port);
                Ok(channel)
            }
            Err(e) => {
                self.stats.handshake_failures += 1;
                self.apply(ConnectionEvent::HandshakeFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Run the session tasks on `channel` until the session ends
    pub async fn run_session(
        &mut self,
        channel: Arc<SharedChannel>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let info = SessionInfo {
            port: channel.port().to_string(),
            started_at: self.services.clock.now(),
        };
        let session = Arc::new(SessionContext::new(info, channel, cancel.child_token()));

        let mut supervisor = SessionSupervisor::new(Arc::clone(&session));
        for task in session_tasks(&self.services) {
            supervisor.spawn(task);
        }
        info!(
            "Session on {} running {} task(s)",
            session.info.port,
            supervisor.task_count()
        );

        let end = supervisor.run().await;
        self.stats.sessions_ended += 1;
        debug!("Channel stats at session end: {:?}", session.channel.stats());

        if cancel.is_cancelled() {
            self.apply(ConnectionEvent::Cancel);
        } else {
            self.apply(ConnectionEvent::SessionEnded { reason: end.reason() });
        }
        end
    }

    // ------------------------------------------------------------------------
    // Attempt Steps
    // ------------------------------------------------------------------------

    async fn discover(&mut self) -> DeskdockResult<String> {
        let serial = &self.services.config.serial;
        if let Some(port) = &serial.port_override {
            return Ok(port.clone());
        }

        self.stats.discovery_attempts += 1;
        let (vid, pid) = (serial.vendor_id, serial.product_id);
        let provider = Arc::clone(&self.provider);
        let found = tokio::task::spawn_blocking(move || provider.discover(vid, pid))
            .await
            .map_err(|_| TransportError::Closed)??;

        found.ok_or_else(|| TransportError::DeviceNotFound { vid, pid }.into())
    }

    async fn open(&self, port: &str) -> DeskdockResult<crate::link::LinkPair> {
        let provider = Arc::clone(&self.provider);
        let config = self.services.config.serial.clone();
        let port = port.to_string();
        let link = tokio::task::spawn_blocking(move || provider.open(&port, &config))
            .await
            .map_err(|_| TransportError::Closed)??;
        Ok(link)
    }

    /// Send the host token and wait for the device token anywhere in the inbound bytes.
    ///
    /// Bytes that follow the token are handed to the channel's line reader.
    async fn handshake(
        &self,
        channel: &SharedChannel,
        cancel: &CancellationToken,
    ) -> DeskdockResult<()> {
        let serial = &self.services.config.serial;
        let expected = serial.device_ready_token.as_bytes();
        let timeout = serial.handshake_timeout();
        let deadline = Instant::now() + timeout;

        channel.discard_input().await?;
        channel
            .write_raw(serial.host_ready_token.as_bytes().to_vec())
            .await?;
        debug!("Sent host token on {}", channel.port());

        let mut received: Vec<u8> = Vec::new();
        loop {
            received.extend(channel.read_raw().await?);
            if let Some(end) = find_token(&received, expected) {
                let tail = received.split_off(end);
                if !tail.is_empty() {
                    trace!("Keeping {} bytes received after the device token", tail.len());
                }
                return channel.seed_input(tail).await;
            }
            // Keep only a tail long enough to hold a token split across reads
            let keep = serial.max_line_len.max(expected.len());
            if received.len() > keep {
                received.drain(..received.len() - keep);
            }

            if Instant::now() >= deadline {
                return Err(SessionError::HandshakeTimeout {
                    duration_ms: timeout.as_millis() as u64,
                }
                .into());
            }
            if !sleep_or_cancel(cancel, HANDSHAKE_POLL).await {
                return Err(SessionError::Cancelled.into());
            }
        }
    }

    /// Advance the state machine; an invalid pair is logged and leaves the state as is
    fn apply(&mut self, event: ConnectionEvent) {
        let event_name = event.name();
        match self.state.clone().transition(event) {
            Ok(next) => {
                if next.state_name() != self.state.state_name() {
                    debug!("Connection: {} -> {} ({})", self.state, next, event_name);
                }
                self.state = next;
            }
            Err(e) => warn!("{}", e),
        }
    }
}

/// Tasks started for one session in the configured mode
pub fn session_tasks(services: &Arc<BridgeServices>) -> Vec<Box<dyn SessionTask>> {
    match services.config.telemetry.mode {
        SessionMode::Concurrent => vec![
            Box::new(SlowTelemetryTask::new(Arc::clone(services))),
            Box::new(FastTelemetryTask::new(Arc::clone(services))),
            Box::new(CommandConsumerTask::new(Arc::clone(services))),
            Box::new(IconSyncWorker::new(Arc::clone(services))),
        ],
        SessionMode::SingleExchange => {
            vec![Box::new(SingleExchangeTask::new(Arc::clone(services)))]
        }
    }
}

/// Offset just past the first occurrence of `needle`
fn find_token(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|start| start + needle.len())
}
