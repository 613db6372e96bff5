//! Linear Connection State Machine
//!
//! Each transition consumes the current state, so a stale state can never be acted on
//! after the link has moved on. The runtime's connection manager drives this machine with
//! the outcome of each discovery, open and handshake attempt.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// Lifecycle of the single serial session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No port open
    Disconnected(DisconnectedState),
    /// Searching for a device with the configured vid/pid
    Discovering(DiscoveringState),
    /// Port open, exchanging ready tokens
    Handshaking(HandshakingState),
    /// Session live; concurrent tasks are running
    Connected(ConnectedState),
}

/// State when no port is open
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisconnectedState {
    /// Handshakes failed since the last successful session
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// State while searching for the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveringState {
    /// Unsuccessful searches in this discovery phase
    pub attempts: u32,
    pub consecutive_failures: u32,
}

/// State while the ready tokens are exchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakingState {
    pub port: String,
    pub consecutive_failures: u32,
}

/// State while a session is live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedState {
    pub port: String,
    pub connected_since: NaiveDateTime,
}

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Begin (or resume) searching for the device
    StartDiscovery,
    /// No matching device present
    DeviceMissing,
    /// A matching device exists but could not be opened
    OpenFailed { reason: String },
    /// Matching device opened and settled
    DeviceOpened { port: String },
    /// Device answered with its ready token
    HandshakeSucceeded { at: NaiveDateTime },
    /// Token never arrived or the port failed during the exchange
    HandshakeFailed { reason: String },
    /// A live session ended (I/O error, idle timeout)
    SessionEnded { reason: String },
    /// Explicit shutdown
    Cancel,
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::StartDiscovery => "StartDiscovery",
            ConnectionEvent::DeviceMissing => "DeviceMissing",
            ConnectionEvent::OpenFailed { .. } => "OpenFailed",
            ConnectionEvent::DeviceOpened { .. } => "DeviceOpened",
            ConnectionEvent::HandshakeSucceeded { .. } => "HandshakeSucceeded",
            ConnectionEvent::HandshakeFailed { .. } => "HandshakeFailed",
            ConnectionEvent::SessionEnded { .. } => "SessionEnded",
            ConnectionEvent::Cancel => "Cancel",
        }
    }
}

/// Errors from invalid state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected(DisconnectedState::default())
    }
}

impl ConnectionState {
    pub fn new_disconnected() -> Self {
        Self::default()
    }

    /// Current state name for logging
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Discovering(_) => "Discovering",
            ConnectionState::Handshaking(_) => "Handshaking",
            ConnectionState::Connected(_) => "Connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    /// Port of the open device, if any
    pub fn port(&self) -> Option<&str> {
        match self {
            ConnectionState::Handshaking(s) => Some(&s.port),
            ConnectionState::Connected(s) => Some(&s.port),
            _ => None,
        }
    }

    /// Process an event and transition to the next state (consumes self)
    pub fn transition(self, event: ConnectionEvent) -> Result<Self, StateTransitionError> {
        let from = self.state_name();
        let event_name = event.name();

        let next = match (self, event) {
            (_, ConnectionEvent::Cancel) => ConnectionState::Disconnected(DisconnectedState {
                consecutive_failures: 0,
                last_error: Some("cancelled".to_string()),
            }),

            // From Disconnected
            (ConnectionState::Disconnected(state), ConnectionEvent::StartDiscovery) => {
                ConnectionState::Discovering(DiscoveringState {
                    attempts: 0,
                    consecutive_failures: state.consecutive_failures,
                })
            }

            // From Discovering
            (ConnectionState::Discovering(state), ConnectionEvent::StartDiscovery) => {
                ConnectionState::Discovering(state)
            }
            (ConnectionState::Discovering(mut state), ConnectionEvent::DeviceMissing)
            | (ConnectionState::Discovering(mut state), ConnectionEvent::OpenFailed { .. }) => {
                state.attempts = state.attempts.saturating_add(1);
                ConnectionState::Discovering(state)
            }
            (ConnectionState::Discovering(state), ConnectionEvent::DeviceOpened { port }) => {
                ConnectionState::Handshaking(HandshakingState {
                    port,
                    consecutive_failures: state.consecutive_failures,
                })
            }

            // From Handshaking
            (ConnectionState::Handshaking(state), ConnectionEvent::HandshakeSucceeded { at }) => {
                ConnectionState::Connected(ConnectedState {
                    port: state.port,
                    connected_since: at,
                })
            }
            (ConnectionState::Handshaking(state), ConnectionEvent::HandshakeFailed { reason }) => {
                ConnectionState::Disconnected(DisconnectedState {
                    consecutive_failures: state.consecutive_failures.saturating_add(1),
                    last_error: Some(reason),
                })
            }

            // From Connected
            (ConnectionState::Connected(_), ConnectionEvent::SessionEnded { reason }) => {
                ConnectionState::Disconnected(DisconnectedState {
                    consecutive_failures: 0,
                    last_error: Some(reason),
                })
            }

            _ => {
                return Err(StateTransitionError::InvalidTransition {
                    from,
                    event: event_name,
                })
            }
        };

        Ok(next)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port() {
            Some(port) => write!(f, "{} ({})", self.state_name(), port),
            None => f.write_str(self.state_name()),
        }
    }
}
