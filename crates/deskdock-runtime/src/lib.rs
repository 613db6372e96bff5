//! deskdock Runtime Engine
//!
//! The async side of the bridge:
//! - `ConnectionManager`: discovery, handshake and the reconnect loop
//! - `SharedChannel`: serialized writes and single-owner line reads on one open link
//! - `SessionSupervisor`: starts the session tasks and tears them down together
//! - session tasks: telemetry producers, command consumer, icon sync, single exchange
//! - `AppWatcher` and `RegistryStore`: application observation feeding the ranking
//! - `Bridge` / `BridgeBuilder`: composition root used by the CLI and by tests
//!
//! `deskdock-core` provides the protocol, state machine and data model this crate drives.

pub mod bridge;
pub mod channel;
pub mod connection;
pub mod link;
pub mod registry_store;
pub mod serial;
pub mod session;
pub mod supervisor;
pub mod system;
pub mod tasks;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{Bridge, BridgeBuilder};
pub use channel::{ChannelStats, SharedChannel};
pub use connection::{session_tasks, ConnectionManager, ConnectionStats};
pub use link::{DeviceProvider, LinkPair, LinkReader, LinkWriter};
pub use registry_store::RegistryStore;
pub use serial::{list_ports, PortSummary, SerialPortProvider};
pub use session::{BridgeServices, SessionContext, SessionInfo};
pub use supervisor::{SessionEnd, SessionSupervisor, DEFAULT_SHUTDOWN_DEADLINE};
pub use system::{SysinfoTelemetry, SystemSample, TelemetrySource};
pub use tasks::{
    AppWatcher, CommandConsumerTask, FastTelemetryTask, IconSyncWorker, SessionTask,
    SingleExchangeTask, SlowTelemetryTask, SyncTracker, WatchReport,
};

// Re-export core types for convenience
pub use deskdock_core::{BridgeConfig, DeskdockError, DeskdockResult};
