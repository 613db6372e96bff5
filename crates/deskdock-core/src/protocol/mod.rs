//! deskdock Wire Protocol
//!
//! The link carries UTF-8 JSON objects, one per `\n`-terminated line, except for the raw
//! handshake tokens and the binary icon payload that follows an `IconReady` line.
//!
//! - [`message`]: outbound/inbound message variants and line codec
//! - [`connection_state`]: linear connection lifecycle state machine
//! - [`transfer`]: chunk planning and checksums for icon payloads

pub mod connection_state;
pub mod message;
pub mod transfer;

pub use connection_state::{
    ConnectedState, ConnectionEvent, ConnectionState, DisconnectedState, DiscoveringState,
    HandshakingState, StateTransitionError,
};
pub use message::{
    FastTelemetry, IconAck, IconAnnounce, InboundMessage, OutboundMessage, SettingsChange,
    SlowTelemetry,
};
pub use transfer::{payload_crc, ChunkPlan, DEFAULT_CHUNK_SIZE};
