//! Application watcher
//!
//! Runs for the lifetime of the bridge, connected or not. Each pass lists user
//! applications, and for every process not seen before extracts and encodes its icon,
//! writes `<icons_dir>/<name>.bin` plus a `<name>.png` preview, and records the
//! observation in the registry store (which re-ranks, persists and wakes the icon-sync
//! worker on growth).

use deskdock_core::{
    encode_icon, encode_png, sanitize_friendly_name, write_atomically, AppEnumerator,
    AppObservation, CollaboratorError, DeskdockResult, IconExtractor, ObservedApp,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::call_blocking;
use crate::session::BridgeServices;

/// Outcome of one watcher pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchReport {
    /// Processes recorded in this pass
    pub recorded: usize,
    /// Friendly names that were new to the registry
    pub new_apps: Vec<String>,
    /// Processes skipped because of a failure; they are retried next pass
    pub failures: usize,
}

/// Observes running applications and feeds the registry
pub struct AppWatcher {
    services: Arc<BridgeServices>,
    enumerator: Arc<dyn AppEnumerator>,
    extractor: Arc<dyn IconExtractor>,
    seen_pids: HashSet<u32>,
}

impl AppWatcher {
    pub fn new(
        services: Arc<BridgeServices>,
        enumerator: Arc<dyn AppEnumerator>,
        extractor: Arc<dyn IconExtractor>,
    ) -> Self {
        Self {
            services,
            enumerator,
            extractor,
            seen_pids: HashSet::new(),
        }
    }

    /// Scan on the configured interval until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> DeskdockResult<()> {
        let mut ticker = interval(self.services.config.icons.watch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("App watcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.scan_once().await;
            if report.recorded > 0 || report.failures > 0 {
                debug!("Watcher pass: {:?}", report);
            }
        }

        info!("App watcher stopped");
        Ok(())
    }

    /// One enumeration pass
    pub async fn scan_once(&mut self) -> WatchReport {
        let mut report = WatchReport::default();
        let enumerator = Arc::clone(&self.enumerator);
        let apps = match call_blocking("list_user_applications", move || {
            enumerator.list_user_applications()
        })
        .await
        {
            Ok(apps) => apps,
            Err(e) => {
                warn!("{}", e);
                return report;
            }
        };

        for app in apps {
            if self.seen_pids.contains(&app.pid) {
                continue;
            }
            let Some(name) = sanitize_friendly_name(&app.display_name) else {
                debug!("No usable name for {:?}", app.display_name);
                self.seen_pids.insert(app.pid);
                continue;
            };

            let (icon_bin, icon_png) = match self.write_icon(&app, &name).await {
                Ok(paths) => paths,
                Err(e) => {
                    warn!("Skipping {} (pid {}): {}", name, app.pid, e);
                    report.failures += 1;
                    continue;
                }
            };

            let observation = AppObservation {
                friendly_name: name.clone(),
                exe_path: app.exe_path.display().to_string(),
                icon_bin,
                icon_png,
            };
            match self
                .services
                .registry
                .record(observation, self.services.clock.now())
                .await
            {
                Ok(is_new) => {
                    self.seen_pids.insert(app.pid);
                    report.recorded += 1;
                    if is_new {
                        info!("New user app: {} ({})", name, app.exe_path.display());
                        report.new_apps.push(name);
                    }
                }
                Err(e) => {
                    warn!("Failed to record {}: {}", name, e);
                    report.failures += 1;
                }
            }
        }
        report
    }

    /// Extract, encode and store the device icon and its preview for `app`.
    ///
    /// Both files are replaced atomically. A preview that cannot be written is logged and
    /// left out; the device icon is required.
    async fn write_icon(
        &self,
        app: &ObservedApp,
        name: &str,
    ) -> Result<(PathBuf, Option<PathBuf>), CollaboratorError> {
        let icons = &self.services.config.icons;
        let extractor = Arc::clone(&self.extractor);
        let exe_path = app.exe_path.clone();
        let (width, height) = (icons.icon_width, icons.icon_height);
        let bin_path = icons.icons_dir.join(format!("{name}.bin"));
        let png_path = icons.icons_dir.join(format!("{name}.png"));

        let (bin, png) = (bin_path.clone(), png_path.clone());
        let preview_written = call_blocking("extract_icon", move || {
            let image = extractor.extract_icon(&exe_path, width, height)?;
            if !image.is_consistent() {
                return Err(CollaboratorError::Failed {
                    operation: "extract_icon".to_string(),
                    reason: format!(
                        "{} pixels for a {}x{} icon",
                        image.pixels.len(),
                        image.width,
                        image.height
                    ),
                });
            }
            write_atomically(&bin, &encode_icon(&image)).map_err(|e| {
                CollaboratorError::Failed {
                    operation: "write_icon".to_string(),
                    reason: e.to_string(),
                }
            })?;

            let preview = encode_png(&image)
                .map_err(|e| e.to_string())
                .and_then(|bytes| write_atomically(&png, &bytes).map_err(|e| e.to_string()));
            if let Err(reason) = &preview {
                warn!("No preview for {}: {}", png.display(), reason);
            }
            Ok(preview.is_ok())
        })
        .await?;

        Ok((bin_path, preview_written.then_some(png_path)))
    }
}
