//! Bridge Builder API
//!
//! Composition root for consumers (CLI, tests): collect configuration and collaborators,
//! open the registry, and run the application watcher next to the connection manager.

use deskdock_core::{
    AppEnumerator, BridgeConfig, Clock, CommandDispatcher, DeskdockError, DeskdockResult,
    IconExtractor, SystemClock, SystemControls,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::link::DeviceProvider;
use crate::registry_store::RegistryStore;
use crate::session::BridgeServices;
use crate::system::{SysinfoTelemetry, TelemetrySource};
use crate::tasks::{AppWatcher, SyncTracker};

/// How long the watcher may take to stop once the bridge is cancelled
const WATCHER_SHUTDOWN: Duration = Duration::from_secs(3);

// ----------------------------------------------------------------------------
// Bridge Builder
// ----------------------------------------------------------------------------

/// Builder for a [`Bridge`]
pub struct BridgeBuilder {
    config: BridgeConfig,
    provider: Option<Arc<dyn DeviceProvider>>,
    controls: Option<Arc<dyn SystemControls>>,
    dispatcher: Option<Arc<dyn CommandDispatcher>>,
    telemetry: Option<Arc<dyn TelemetrySource>>,
    clock: Option<Arc<dyn Clock>>,
    enumerator: Option<Arc<dyn AppEnumerator>>,
    extractor: Option<Arc<dyn IconExtractor>>,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            provider: None,
            controls: None,
            dispatcher: None,
            telemetry: None,
            clock: None,
            enumerator: None,
            extractor: None,
        }
    }

    /// Where the peripheral is found and opened
    pub fn with_provider(mut self, provider: Arc<dyn DeviceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_controls(mut self, controls: Arc<dyn SystemControls>) -> Self {
        self.controls = Some(controls);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Defaults to [`SysinfoTelemetry`]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Defaults to [`SystemClock`]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_enumerator(mut self, enumerator: Arc<dyn AppEnumerator>) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn IconExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Validate the configuration and open the registry.
    ///
    /// Fails when a required collaborator is missing or the registry cannot be read.
    pub async fn build(self) -> DeskdockResult<Bridge> {
        self.config.validate()?;

        let provider = required(self.provider, "device provider")?;
        let controls = required(self.controls, "system controls")?;
        let dispatcher = required(self.dispatcher, "command dispatcher")?;
        let enumerator = required(self.enumerator, "app enumerator")?;
        let extractor = required(self.extractor, "icon extractor")?;
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(SysinfoTelemetry::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        let registry = RegistryStore::open(&self.config.icons, self.config.ranking.clone())?;
        // Apps already registered at startup are not announced again
        let sync = Arc::new(SyncTracker::new(registry.keys().await));

        let services = Arc::new(BridgeServices {
            config: self.config,
            controls,
            dispatcher,
            telemetry,
            clock,
            registry,
            sync,
        });

        Ok(Bridge {
            services,
            provider,
            enumerator,
            extractor,
        })
    }
}

fn required<T: ?Sized>(value: Option<Arc<T>>, what: &str) -> DeskdockResult<Arc<T>> {
    value.ok_or_else(|| DeskdockError::config_error(format!("Bridge requires a {what}")))
}

// ----------------------------------------------------------------------------
// Bridge
// ----------------------------------------------------------------------------

/// A configured bridge, ready to run
pub struct Bridge {
    services: Arc<BridgeServices>,
    provider: Arc<dyn DeviceProvider>,
    enumerator: Arc<dyn AppEnumerator>,
    extractor: Arc<dyn IconExtractor>,
}

impl Bridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    pub fn services(&self) -> &Arc<BridgeServices> {
        &self.services
    }

    /// Watcher for this bridge's registry, for callers that drive scans themselves
    pub fn watcher(&self) -> AppWatcher {
        AppWatcher::new(
            Arc::clone(&self.services),
            Arc::clone(&self.enumerator),
            Arc::clone(&self.extractor),
        )
    }

    /// Run the watcher and the connection manager until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> DeskdockResult<()> {
        info!("Bridge starting");

        let watcher = self.watcher();
        let watcher_cancel = cancel.clone();
        let mut watcher_handle = tokio::spawn(async move { watcher.run(watcher_cancel).await });

        let manager = ConnectionManager::new(Arc::clone(&self.provider), Arc::clone(&self.services));
        let result = manager.run(cancel.clone()).await;

        cancel.cancel();
        match tokio::time::timeout(WATCHER_SHUTDOWN, &mut watcher_handle).await {
            Ok(Ok(Err(e))) => warn!("App watcher stopped with error: {}", e),
            Ok(Err(e)) => warn!("App watcher panicked: {}", e),
            Ok(Ok(Ok(()))) => {}
            Err(_) => {
                warn!("App watcher did not stop in time; aborting");
                watcher_handle.abort();
            }
        }

        info!("Bridge stopped");
        result
    }
}
