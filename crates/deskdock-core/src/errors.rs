//! Error types for the deskdock bridge
//!
//! The taxonomy mirrors how failures are absorbed at runtime: transport and session
//! errors end the current session, decode and collaborator errors are logged and skipped,
//! protocol errors abort a single icon transfer, and registry errors are fatal only when
//! storage cannot be opened at startup.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures of the physical link or of locating the device
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No serial device with vid {vid:#06x} pid {pid:#06x} found")]
    DeviceNotFound { vid: u16, pid: u16 },
    #[error("Failed to open serial port {port}: {reason}")]
    OpenFailed { port: String, reason: String },
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial channel closed")]
    Closed,
}

/// Failures of the session lifecycle itself
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Handshake timed out after {duration_ms}ms")]
    HandshakeTimeout { duration_ms: u64 },
    #[error("No data received for {duration_ms}ms")]
    IdleTimeout { duration_ms: u64 },
    #[error("Session cancelled")]
    Cancelled,
}

/// A malformed inbound line
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {line}")]
    InvalidJson {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Expected a JSON object, got: {line}")]
    NotAnObject { line: String },
}

/// Failures reported by OS-facing collaborators
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{operation} is not supported on this host")]
    Unsupported { operation: String },
    #[error("{operation} failed: {reason}")]
    Failed { operation: String, reason: String },
}

/// Failures of the icon transfer protocol for a single app
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Device never signalled readiness for {app} within {duration_ms}ms")]
    ReadyTimeout { app: String, duration_ms: u64 },
    #[error("Device rejected {app} payload checksum after {attempts} attempts")]
    ChecksumRejected { app: String, attempts: u32 },
    #[error("Invalid icon header: {reason}")]
    InvalidIconHeader { reason: String },
}

/// Failures reading or writing persisted registry state
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Registry file {path} is malformed: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for the deskdock bridge
#[derive(Debug, thiserror::Error)]
pub enum DeskdockError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("State transition error: {0}")]
    StateTransition(#[from] crate::protocol::StateTransitionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl DeskdockError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        DeskdockError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a collaborator failure for an operation
    pub fn collaborator_failed<O: Into<String>, R: Into<String>>(operation: O, reason: R) -> Self {
        DeskdockError::Collaborator(CollaboratorError::Failed {
            operation: operation.into(),
            reason: reason.into(),
        })
    }

    /// Create an error for an I/O failure on the serial link
    pub fn io(err: std::io::Error) -> Self {
        DeskdockError::Transport(TransportError::Io(err))
    }

    /// Whether this error must tear down the current session
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            DeskdockError::Transport(_) | DeskdockError::Session(_)
        )
    }
}

impl From<std::io::Error> for DeskdockError {
    fn from(err: std::io::Error) -> Self {
        DeskdockError::io(err)
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, DeskdockError>;
pub type DeskdockResult<T> = Result<T>;
