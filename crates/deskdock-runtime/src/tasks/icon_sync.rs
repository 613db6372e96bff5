//! Icon synchronization
//!
//! The worker wakes when the registry grows (and on a fixed poll), re-ranks, and pushes
//! the icon of every app it has not delivered yet, one app at a time under the channel's
//! exclusive transfer guard.
//!
//! Per app the exchange is:
//!
//! 1. `IconAnnounce` line with name, dimensions, CRC-32 and score
//! 2. device answers with its ready marker (bounded wait)
//! 3. pending input is discarded and the payload is written in fixed-size chunks
//! 4. `{"done": "done"}`
//! 5. optional `icon_ack`; `crc_error` restarts from step 1 up to the resend limit
//!
//! A device that never acknowledges is treated as having accepted the payload.

use async_trait::async_trait;
use deskdock_core::{
    detect_new_apps, AppEntry, ChunkPlan, CollaboratorError, DeskdockError, DeskdockResult,
    IconAnnounce, IconHeader, InboundMessage, OutboundMessage, ProtocolError, Registry,
    SessionError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::commands::dispatch_line;
use super::SessionTask;
use crate::session::{BridgeServices, SessionContext};

/// Upper bound on a single read while waiting for a protocol reply
const REPLY_POLL: Duration = Duration::from_millis(50);

// ----------------------------------------------------------------------------
// Sync Tracker
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SyncState {
    /// Keys already handled (delivered or failed)
    known: BTreeSet<String>,
    /// Failed apps and their `times_run` at the time of failure
    failed: BTreeMap<String, u64>,
}

/// Detection snapshot shared across sessions
#[derive(Debug, Default)]
pub struct SyncTracker {
    state: Mutex<SyncState>,
}

impl SyncTracker {
    /// Start from `known`; only keys added later are considered new
    pub fn new(known: BTreeSet<String>) -> Self {
        Self {
            state: Mutex::new(SyncState {
                known,
                failed: BTreeMap::new(),
            }),
        }
    }

    /// Apps to transfer now, ascending: new keys plus failed apps observed again since
    pub async fn pending(&self, registry: &Registry) -> Vec<String> {
        let state = self.state.lock().await;
        let mut pending: BTreeSet<String> = detect_new_apps(&state.known, &registry.keys())
            .into_iter()
            .collect();

        for (name, times_run_at_failure) in &state.failed {
            if registry
                .get(name)
                .is_some_and(|entry| entry.times_run > *times_run_at_failure)
            {
                pending.insert(name.clone());
            }
        }
        pending.into_iter().collect()
    }

    pub async fn mark_synced(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.known.insert(name.to_string());
        state.failed.remove(name);
    }

    pub async fn mark_failed(&self, name: &str, times_run: u64) {
        let mut state = self.state.lock().await;
        state.known.insert(name.to_string());
        state.failed.insert(name.to_string(), times_run);
    }

    pub async fn known(&self) -> BTreeSet<String> {
        self.state.lock().await.known.clone()
    }

    pub async fn failed(&self) -> Vec<String> {
        self.state.lock().await.failed.keys().cloned().collect()
    }
}

// ----------------------------------------------------------------------------
// Icon Sync Worker
// ----------------------------------------------------------------------------

/// Device verdict after a complete transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckOutcome {
    Confirmed,
    /// No ack within the timeout
    Silent,
    Rejected,
}

/// Session task delivering icons of newly registered apps
pub struct IconSyncWorker {
    services: Arc<BridgeServices>,
}

impl IconSyncWorker {
    pub fn new(services: Arc<BridgeServices>) -> Self {
        Self { services }
    }

    /// Re-rank and deliver every pending app once.
    ///
    /// Per-app failures are recorded and skipped; only session-ending errors propagate.
    pub async fn sync_pending(&self, session: &SessionContext) -> DeskdockResult<Vec<String>> {
        let services = &self.services;
        services.registry.rerank(services.clock.now()).await;
        let registry = services.registry.snapshot().await;
        let pending = services.sync.pending(&registry).await;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        debug!("{} icon(s) pending: {:?}", pending.len(), pending);

        let mut delivered = Vec::new();
        for name in pending {
            if session.is_cancelled() {
                break;
            }
            let Some(entry) = registry.get(&name) else {
                continue;
            };

            match self.sync_app(session, entry).await {
                Ok(()) => {
                    info!("Delivered icon for {}", name);
                    services.sync.mark_synced(&name).await;
                    delivered.push(name);
                }
                Err(e) if e.ends_session() => return Err(e),
                Err(e) => {
                    warn!("Icon transfer for {} failed: {}", name, e);
                    services.sync.mark_failed(&name, entry.times_run).await;
                }
            }
        }
        Ok(delivered)
    }

    async fn sync_app(&self, session: &SessionContext, entry: &AppEntry) -> DeskdockResult<()> {
        let icons = &self.services.config.icons;
        let payload = tokio::fs::read(&entry.icon_bin).await.map_err(|e| {
            DeskdockError::Collaborator(CollaboratorError::Failed {
                operation: format!("read icon {}", entry.icon_bin.display()),
                reason: e.to_string(),
            })
        })?;
        let header = IconHeader::parse(&payload)?;
        let plan = ChunkPlan::new(&payload, icons.chunk_size);
        let announce = OutboundMessage::IconAnnounce(IconAnnounce {
            new_app: entry.friendly_name.clone(),
            height: header.height,
            width: header.width,
            crc: plan.crc(),
            score: entry.score,
        });

        let _transfer = tokio::select! {
            _ = session.cancel_token().cancelled() => return Err(SessionError::Cancelled.into()),
            guard = session.channel.exclusive() => guard,
        };

        let attempts = icons.max_resends.saturating_add(1);
        for attempt in 1..=attempts {
            self.transfer(session, &entry.friendly_name, &announce, &plan)
                .await?;
            match self.await_ack(session, plan.crc()).await? {
                AckOutcome::Confirmed => {
                    debug!("Device confirmed {} on attempt {}", entry.friendly_name, attempt);
                    return Ok(());
                }
                AckOutcome::Silent => return Ok(()),
                AckOutcome::Rejected => {
                    warn!(
                        "Device reported a checksum error for {} (attempt {}/{})",
                        entry.friendly_name, attempt, attempts
                    );
                }
            }
        }

        Err(ProtocolError::ChecksumRejected {
            app: entry.friendly_name.clone(),
            attempts,
        }
        .into())
    }

    /// Announce, wait for readiness, stream the payload and close with `done`
    async fn transfer(
        &self,
        session: &SessionContext,
        app: &str,
        announce: &OutboundMessage,
        plan: &ChunkPlan<'_>,
    ) -> DeskdockResult<()> {
        let channel = &session.channel;
        channel.send(announce).await?;
        self.await_ready(session, app).await?;

        channel.discard_input().await?;
        for chunk in plan.chunks() {
            if session.is_cancelled() {
                return Err(SessionError::Cancelled.into());
            }
            channel.write_raw(chunk.to_vec()).await?;
        }
        debug!(
            "Sent {} bytes in {} chunks for {}",
            plan.total_len(),
            plan.chunk_count(),
            app
        );

        channel.send(&OutboundMessage::IconDone).await
    }

    async fn await_ready(&self, session: &SessionContext, app: &str) -> DeskdockResult<()> {
        let timeout = self.services.config.icons.ready_timeout();
        let deadline = Instant::now() + timeout;

        while let Some(line) = self.next_line_before(session, deadline).await? {
            match InboundMessage::decode(&line, &self.services.config.icons.ready_marker) {
                Ok(InboundMessage::IconReady) => return Ok(()),
                _ => {
                    dispatch_line(&self.services, &line).await;
                }
            }
        }

        Err(ProtocolError::ReadyTimeout {
            app: app.to_string(),
            duration_ms: timeout.as_millis() as u64,
        }
        .into())
    }

    async fn await_ack(&self, session: &SessionContext, crc: u32) -> DeskdockResult<AckOutcome> {
        let deadline = Instant::now() + self.services.config.icons.ack_timeout();

        while let Some(line) = self.next_line_before(session, deadline).await? {
            match InboundMessage::decode(&line, &self.services.config.icons.ready_marker) {
                Ok(InboundMessage::IconAck(ack)) if ack.confirms(crc) => {
                    return Ok(AckOutcome::Confirmed)
                }
                Ok(InboundMessage::IconAck(_)) => return Ok(AckOutcome::Rejected),
                _ => {
                    dispatch_line(&self.services, &line).await;
                }
            }
        }
        Ok(AckOutcome::Silent)
    }

    /// Next inbound line, or `None` once `deadline` passes
    async fn next_line_before(
        &self,
        session: &SessionContext,
        deadline: Instant,
    ) -> DeskdockResult<Option<String>> {
        loop {
            if session.is_cancelled() {
                return Err(SessionError::Cancelled.into());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if let Some(line) = session.channel.read_line(remaining.min(REPLY_POLL)).await? {
                return Ok(Some(line));
            }
        }
    }
}

#[async_trait]
impl SessionTask for IconSyncWorker {
    fn name(&self) -> &'static str {
        "icon_sync"
    }

    async fn run(self: Box<Self>, session: Arc<SessionContext>) -> DeskdockResult<()> {
        let poll = self.services.config.icons.sync_interval();

        loop {
            match self.sync_pending(&session).await {
                Ok(_) => {}
                Err(_) if session.is_cancelled() => return Ok(()),
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = session.cancel_token().cancelled() => return Ok(()),
                _ = self.services.registry.new_apps_notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}
