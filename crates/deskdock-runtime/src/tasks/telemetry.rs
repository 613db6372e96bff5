//! Telemetry producers
//!
//! The slow task sends a system snapshot on a fixed interval; the fast task sends volume
//! and brightness as often as the link allows (or on its configured interval). Each holds
//! the shared transfer guard for exactly one message, so an icon transfer can slip in
//! between any two.

use async_trait::async_trait;
use deskdock_core::{
    CollaboratorError, DeskdockResult, FastTelemetry, OutboundMessage, SessionError,
};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::{call_blocking, sleep_or_cancel, SessionTask};
use crate::session::{BridgeServices, SessionContext};

// ----------------------------------------------------------------------------
// Message Builders
// ----------------------------------------------------------------------------

/// Sample the host and build a slow telemetry message
pub async fn slow_message(services: &BridgeServices) -> Result<OutboundMessage, CollaboratorError> {
    let source = Arc::clone(&services.telemetry);
    let sample = call_blocking("system_sample", move || source.sample()).await?;
    Ok(OutboundMessage::SlowTelemetry(
        sample.into_slow_telemetry(services.clock.now()),
    ))
}

/// Read volume and brightness; a failing getter reports 0
pub async fn fast_message(services: &BridgeServices) -> OutboundMessage {
    let controls = Arc::clone(&services.controls);
    let volume = call_blocking("volume", move || controls.volume())
        .await
        .unwrap_or_else(|e| {
            debug!("{}", e);
            0
        });

    let controls = Arc::clone(&services.controls);
    let brightness = call_blocking("brightness", move || controls.brightness())
        .await
        .unwrap_or_else(|e| {
            debug!("{}", e);
            0
        });

    OutboundMessage::FastTelemetry(FastTelemetry {
        volume: volume.min(100),
        brightness: brightness.min(100),
    })
}

/// Send one message while holding the shared transfer guard
async fn send_cycle(session: &SessionContext, message: &OutboundMessage) -> DeskdockResult<()> {
    let _cycle = tokio::select! {
        _ = session.cancel_token().cancelled() => return Err(SessionError::Cancelled.into()),
        guard = session.channel.shared() => guard,
    };
    session.channel.send(message).await
}

// ----------------------------------------------------------------------------
// Slow Telemetry Task
// ----------------------------------------------------------------------------

/// Periodic system snapshot producer
pub struct SlowTelemetryTask {
    services: Arc<BridgeServices>,
}

impl SlowTelemetryTask {
    pub fn new(services: Arc<BridgeServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl SessionTask for SlowTelemetryTask {
    fn name(&self) -> &'static str {
        "slow_telemetry"
    }

    async fn run(self: Box<Self>, session: Arc<SessionContext>) -> DeskdockResult<()> {
        let mut ticker = interval(self.services.config.telemetry.slow_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = session.cancel_token().cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let message = match slow_message(&self.services).await {
                Ok(message) => message,
                Err(e) => {
                    warn!("Skipping slow telemetry: {}", e);
                    continue;
                }
            };

            match send_cycle(&session, &message).await {
                Ok(()) => {}
                Err(e) if session.is_cancelled() => {
                    debug!("Slow telemetry stopped: {}", e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Fast Telemetry Task
// ----------------------------------------------------------------------------

/// Volume/brightness producer
pub struct FastTelemetryTask {
    services: Arc<BridgeServices>,
}

impl FastTelemetryTask {
    pub fn new(services: Arc<BridgeServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl SessionTask for FastTelemetryTask {
    fn name(&self) -> &'static str {
        "fast_telemetry"
    }

    async fn run(self: Box<Self>, session: Arc<SessionContext>) -> DeskdockResult<()> {
        let pause = self.services.config.telemetry.fast_interval();

        while !session.is_cancelled() {
            let message = fast_message(&self.services).await;
            match send_cycle(&session, &message).await {
                Ok(()) => {}
                Err(e) if session.is_cancelled() => {
                    debug!("Fast telemetry stopped: {}", e);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            if pause.is_zero() {
                tokio::task::yield_now().await;
            } else if !sleep_or_cancel(session.cancel_token(), pause).await {
                break;
            }
        }
        Ok(())
    }
}
