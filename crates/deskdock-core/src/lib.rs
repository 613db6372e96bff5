//! deskdock Core
//!
//! Foundational types for the deskdock host bridge: the line/binary wire protocol spoken
//! with the peripheral, the connection lifecycle state machine, the application registry
//! and its usage-based ranking, LVGL icon encoding, configuration, and the collaborator
//! traits through which the runtime reaches the operating system.
//!
//! Nothing in this crate performs I/O on the serial link; the async engine lives in
//! `deskdock-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod icon;
pub mod protocol;
pub mod ranking;
pub mod registry;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use collaborators::{
    AppEnumerator, CommandDispatcher, IconExtractor, ObservedApp, SystemControls,
};
pub use config::{
    BridgeConfig, IconSyncConfig, RankingConfig, SerialConfig, SessionMode, TelemetryConfig,
};
pub use errors::{
    CollaboratorError, DecodeError, DeskdockError, DeskdockResult, ProtocolError, RegistryError,
    SessionError, TransportError,
};
pub use icon::{encode_icon, encode_png, IconHeader, IconImage};
pub use protocol::{
    payload_crc, ChunkPlan, ConnectedState, ConnectionEvent, ConnectionState, DisconnectedState,
    DiscoveringState, FastTelemetry, HandshakingState, IconAck, IconAnnounce, InboundMessage,
    OutboundMessage, SettingsChange, SlowTelemetry, StateTransitionError, DEFAULT_CHUNK_SIZE,
};
pub use ranking::{detect_new_apps, rank, rank_and_store, recency_score, score, top_set, RankedApp};
pub use registry::{
    sanitize_friendly_name, write_atomically, AppEntry, AppObservation, Registry, TopSet,
};
pub use types::{Clock, ManualClock, SystemClock};
