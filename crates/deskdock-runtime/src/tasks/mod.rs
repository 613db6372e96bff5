//! Session and bridge tasks
//!
//! - `SlowTelemetryTask` / `FastTelemetryTask`: periodic JSON producers
//! - `CommandConsumerTask`: inbound line reader and dispatcher
//! - `IconSyncWorker`: ranks, detects new apps and drives the icon transfer protocol
//! - `SingleExchangeTask`: alternate session mode with one write/read loop and idle timeout
//! - `AppWatcher`: bridge-lifetime observer feeding the registry

use async_trait::async_trait;
use deskdock_core::{CollaboratorError, DeskdockResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::session::SessionContext;

pub mod commands;
pub mod exchange;
pub mod icon_sync;
pub mod telemetry;
pub mod watcher;

pub use commands::CommandConsumerTask;
pub use exchange::SingleExchangeTask;
pub use icon_sync::{IconSyncWorker, SyncTracker};
pub use telemetry::{FastTelemetryTask, SlowTelemetryTask};
pub use watcher::{AppWatcher, WatchReport};

// ----------------------------------------------------------------------------
// Session Task Trait
// ----------------------------------------------------------------------------

/// A task that lives exactly as long as one connected session.
///
/// `run` returns `Ok(())` once the session token is cancelled and an error when the
/// session must end.
#[async_trait]
pub trait SessionTask: Send {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, session: Arc<SessionContext>) -> DeskdockResult<()>;
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Sleep for `duration`; `false` if cancelled first
pub(crate) async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run a collaborator call on the blocking pool
pub(crate) async fn call_blocking<T, F>(operation: &str, call: F) -> Result<T, CollaboratorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(result) => result,
        Err(e) => Err(CollaboratorError::Failed {
            operation: operation.to_string(),
            reason: e.to_string(),
        }),
    }
}
