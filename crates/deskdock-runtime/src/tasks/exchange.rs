//! Single-exchange session mode
//!
//! One loop per session: discard stale input, write a slow telemetry line, then wait
//! briefly for one inbound line and apply it. Once the device has spoken at least once,
//! a silence longer than the idle timeout ends the session.

use async_trait::async_trait;
use deskdock_core::{DeskdockResult, SessionError};
use std::sync::Arc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::commands::dispatch_line;
use super::telemetry::slow_message;
use super::SessionTask;
use crate::session::{BridgeServices, SessionContext};

/// Write/read loop with idle detection
pub struct SingleExchangeTask {
    services: Arc<BridgeServices>,
}

impl SingleExchangeTask {
    pub fn new(services: Arc<BridgeServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl SessionTask for SingleExchangeTask {
    fn name(&self) -> &'static str {
        "single_exchange"
    }

    async fn run(self: Box<Self>, session: Arc<SessionContext>) -> DeskdockResult<()> {
        let telemetry = &self.services.config.telemetry;
        let idle_timeout = telemetry.idle_timeout();
        let poll = telemetry.command_poll();
        let mut ticker = interval(telemetry.slow_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_received: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = session.cancel_token().cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            session.channel.discard_input().await?;
            match slow_message(&self.services).await {
                Ok(message) => session.channel.send(&message).await?,
                Err(e) => warn!("Skipping slow telemetry: {}", e),
            }

            if let Some(line) = session.channel.read_line(poll).await? {
                last_received = Some(Instant::now());
                dispatch_line(&self.services, &line).await;
                continue;
            }

            if let Some(at) = last_received {
                let silent_for = at.elapsed();
                if silent_for >= idle_timeout {
                    debug!("No inbound data for {:?}", silent_for);
                    return Err(SessionError::IdleTimeout {
                        duration_ms: idle_timeout.as_millis() as u64,
                    }
                    .into());
                }
            }
        }
    }
}
