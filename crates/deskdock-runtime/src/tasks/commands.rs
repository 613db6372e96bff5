//! Inbound command consumer

use async_trait::async_trait;
use deskdock_core::{DeskdockResult, InboundMessage, SettingsChange};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{call_blocking, SessionTask};
use crate::session::{BridgeServices, SessionContext};

// ----------------------------------------------------------------------------
// Inbound Dispatch
// ----------------------------------------------------------------------------

/// What an inbound line turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Command(String),
    Settings(SettingsChange),
    /// Icon protocol line outside a transfer
    StrayIconMessage,
    Unrecognized,
    Malformed,
}

/// Decode one inbound line and hand it to the matching collaborator.
///
/// Decode and collaborator failures are logged; neither is an error for the caller.
pub async fn dispatch_line(services: &BridgeServices, line: &str) -> Dispatched {
    let message = match InboundMessage::decode(line, &services.config.icons.ready_marker) {
        Ok(message) => message,
        Err(e) => {
            warn!("Discarding inbound line: {}", e);
            return Dispatched::Malformed;
        }
    };

    match message {
        InboundMessage::Command { name } => {
            info!("Device command: {}", name);
            let dispatcher = Arc::clone(&services.dispatcher);
            let command = name.clone();
            if let Err(e) = call_blocking("dispatch", move || dispatcher.dispatch(&command)).await
            {
                warn!("{}", e);
            }
            Dispatched::Command(name)
        }
        InboundMessage::Settings(change) => {
            apply_settings(services, change).await;
            Dispatched::Settings(change)
        }
        InboundMessage::IconReady | InboundMessage::IconAck(_) => {
            debug!("Ignoring icon protocol line outside a transfer: {}", line);
            Dispatched::StrayIconMessage
        }
        InboundMessage::Unrecognized(value) => {
            debug!("Unrecognized inbound object: {}", value);
            Dispatched::Unrecognized
        }
    }
}

/// Forward each present setting independently; values pass through unvalidated
async fn apply_settings(services: &BridgeServices, change: SettingsChange) {
    if let Some(level) = change.volume {
        let controls = Arc::clone(&services.controls);
        match call_blocking("set_volume", move || controls.set_volume(level)).await {
            Ok(()) => debug!("Volume set to {}", level),
            Err(e) => warn!("{}", e),
        }
    }
    if let Some(level) = change.brightness {
        let controls = Arc::clone(&services.controls);
        match call_blocking("set_brightness", move || controls.set_brightness(level)).await {
            Ok(()) => debug!("Brightness set to {}", level),
            Err(e) => warn!("{}", e),
        }
    }
}

// ----------------------------------------------------------------------------
// Command Consumer Task
// ----------------------------------------------------------------------------

/// Polls the channel for inbound lines for the life of a session
pub struct CommandConsumerTask {
    services: Arc<BridgeServices>,
}

impl CommandConsumerTask {
    pub fn new(services: Arc<BridgeServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl SessionTask for CommandConsumerTask {
    fn name(&self) -> &'static str {
        "command_consumer"
    }

    async fn run(self: Box<Self>, session: Arc<SessionContext>) -> DeskdockResult<()> {
        let poll = self.services.config.telemetry.command_poll();

        loop {
            let line = {
                let _cycle = tokio::select! {
                    _ = session.cancel_token().cancelled() => return Ok(()),
                    guard = session.channel.shared() => guard,
                };
                match session.channel.read_line(poll).await {
                    Ok(line) => line,
                    Err(_) if session.is_cancelled() => return Ok(()),
                    Err(e) => return Err(e),
                }
            };

            if let Some(line) = line {
                dispatch_line(&self.services, &line).await;
            }
            if session.is_cancelled() {
                return Ok(());
            }
        }
    }
}
