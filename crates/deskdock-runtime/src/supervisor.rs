//! Session Supervisor
//!
//! Spawns the tasks of one connected session, waits for the first of them to finish (or
//! for cancellation), then cancels the rest and gives them a bounded deadline before
//! aborting whatever is still running.

use deskdock_core::{DeskdockError, DeskdockResult, TransportError};
use futures::future::select_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::session::SessionContext;
use crate::tasks::SessionTask;

/// Time granted to session tasks to observe cancellation
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(3);

/// Why a session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// The session token was cancelled from outside
    Cancelled,
    /// A task failed; its error ends the session
    TaskFailed {
        task: &'static str,
        error: DeskdockError,
    },
    /// A task returned without error while the session was still live
    TaskExited { task: &'static str },
}

impl SessionEnd {
    pub fn reason(&self) -> String {
        match self {
            SessionEnd::Cancelled => "cancelled".to_string(),
            SessionEnd::TaskFailed { task, error } => format!("{task} failed: {error}"),
            SessionEnd::TaskExited { task } => format!("{task} exited"),
        }
    }
}

// ----------------------------------------------------------------------------
// Session Supervisor
// ----------------------------------------------------------------------------

/// Supervises the tasks of one session
pub struct SessionSupervisor {
    session: Arc<SessionContext>,
    handles: Vec<(&'static str, JoinHandle<DeskdockResult<()>>)>,
    shutdown_deadline: Duration,
}

impl SessionSupervisor {
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self {
            session,
            handles: Vec::new(),
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
        }
    }

    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = deadline;
        self
    }

    /// Start a task on the runtime
    pub fn spawn(&mut self, task: Box<dyn SessionTask>) {
        let name = task.name();
        let session = Arc::clone(&self.session);
        debug!("Starting session task {}", name);
        self.handles
            .push((name, tokio::spawn(async move { task.run(session).await })));
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Block until the session ends, then tear every task down
    pub async fn run(mut self) -> SessionEnd {
        if self.handles.is_empty() {
            self.session.cancel_token().cancelled().await;
            return SessionEnd::Cancelled;
        }

        let end = {
            let futures = self.handles.iter_mut().map(|(_, handle)| handle);
            tokio::select! {
                _ = self.session.cancel_token().cancelled() => None,
                (result, index, _) = select_all(futures) => Some((index, result)),
            }
        };

        let end = match end {
            None => SessionEnd::Cancelled,
            Some((index, result)) => {
                let (task, _) = self.handles.remove(index);
                match result {
                    Ok(Ok(())) if self.session.is_cancelled() => SessionEnd::Cancelled,
                    Ok(Ok(())) => SessionEnd::TaskExited { task },
                    Ok(Err(error)) => SessionEnd::TaskFailed { task, error },
                    Err(join_error) => {
                        error!("Session task {} panicked: {}", task, join_error);
                        SessionEnd::TaskFailed {
                            task,
                            error: TransportError::Closed.into(),
                        }
                    }
                }
            }
        };

        match &end {
            SessionEnd::Cancelled => info!("Session on {} cancelled", self.session.info.port),
            other => warn!("Session on {} ending: {}", self.session.info.port, other.reason()),
        }

        self.session.end();
        self.shutdown().await;
        end
    }

    async fn shutdown(&mut self) {
        let deadline = Instant::now() + self.shutdown_deadline;

        for (name, handle) in self.handles.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut *handle).await {
                Ok(Ok(Err(e))) => debug!("Task {} stopped with: {}", name, e),
                Ok(_) => debug!("Task {} stopped", name),
                Err(_) => {
                    warn!("Task {} missed the shutdown deadline; aborting", name);
                    handle.abort();
                }
            }
        }
        self.handles.clear();
    }
}
