//! Session context
//!
//! [`BridgeServices`] lives for the whole bridge: configuration, collaborators, clock, the
//! registry store and the icon-sync tracker. [`SessionContext`] lives for one connected
//! session and is shared by reference with its tasks; cancelling its token ends them all.

use chrono::NaiveDateTime;
use deskdock_core::{BridgeConfig, Clock, CommandDispatcher, SystemControls};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::channel::SharedChannel;
use crate::registry_store::RegistryStore;
use crate::system::TelemetrySource;
use crate::tasks::icon_sync::SyncTracker;

// ----------------------------------------------------------------------------
// Bridge Services
// ----------------------------------------------------------------------------

/// Long-lived dependencies shared by every session
pub struct BridgeServices {
    pub config: BridgeConfig,
    pub controls: Arc<dyn SystemControls>,
    pub dispatcher: Arc<dyn CommandDispatcher>,
    pub telemetry: Arc<dyn TelemetrySource>,
    pub clock: Arc<dyn Clock>,
    pub registry: RegistryStore,
    /// Detection snapshot and failed transfers; survives reconnects
    pub sync: Arc<SyncTracker>,
}

impl std::fmt::Debug for BridgeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Session Context
// ----------------------------------------------------------------------------

/// Identity of one connected session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub port: String,
    pub started_at: NaiveDateTime,
}

/// State shared by the tasks of one session
#[derive(Debug)]
pub struct SessionContext {
    pub info: SessionInfo,
    pub channel: Arc<SharedChannel>,
    cancel: CancellationToken,
    connected: AtomicBool,
}

impl SessionContext {
    /// `cancel` should be a child of the bridge token so shutdown reaches the session
    pub fn new(info: SessionInfo, channel: Arc<SharedChannel>, cancel: CancellationToken) -> Self {
        Self {
            info,
            channel,
            cancel,
            connected: AtomicBool::new(true),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.channel.is_closed()
    }

    /// Mark the session dead and stop every task waiting on the token
    pub fn end(&self) {
        self.connected.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}
