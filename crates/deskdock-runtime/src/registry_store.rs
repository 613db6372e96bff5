//! Shared registry store
//!
//! The application watcher writes and the icon-sync worker reads the same registry. The
//! store keeps it behind an async lock, re-ranks after every change, persists the registry
//! and top-set documents, and wakes the sync worker when a new friendly name appears.

use chrono::NaiveDateTime;
use deskdock_core::{
    rank_and_store, top_set, AppEntry, AppObservation, DeskdockError, DeskdockResult,
    IconSyncConfig, RankedApp, RankingConfig, Registry, RegistryError, TopSet,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

/// Handle to the process-wide registry
#[derive(Debug, Clone)]
pub struct RegistryStore {
    inner: Arc<RwLock<Registry>>,
    registry_path: PathBuf,
    top_apps_path: PathBuf,
    ranking: RankingConfig,
    new_apps: Arc<Notify>,
}

impl RegistryStore {
    /// Load the registry document named in `icons`; a missing file starts empty
    pub fn open(icons: &IconSyncConfig, ranking: RankingConfig) -> Result<Self, RegistryError> {
        let registry = Registry::load(&icons.registry_path)?;
        info!(
            "Registry {} holds {} apps",
            icons.registry_path.display(),
            registry.len()
        );
        Ok(Self {
            inner: Arc::new(RwLock::new(registry)),
            registry_path: icons.registry_path.clone(),
            top_apps_path: icons.top_apps_path.clone(),
            ranking,
            new_apps: Arc::new(Notify::new()),
        })
    }

    pub async fn snapshot(&self) -> Registry {
        self.inner.read().await.clone()
    }

    pub async fn keys(&self) -> BTreeSet<String> {
        self.inner.read().await.keys()
    }

    pub async fn entry(&self, friendly_name: &str) -> Option<AppEntry> {
        self.inner.read().await.get(friendly_name).cloned()
    }

    /// Record an observation, re-rank and persist.
    ///
    /// Returns whether the friendly name was new; new names wake the sync worker.
    pub async fn record(
        &self,
        observation: AppObservation,
        now: NaiveDateTime,
    ) -> DeskdockResult<bool> {
        let (is_new, registry, top) = {
            let mut registry = self.inner.write().await;
            let is_new = registry.record_observation(observation, now);
            let ranked = rank_and_store(&mut registry, now, &self.ranking);
            let top = top_set(&ranked, self.ranking.top_n);
            (is_new, registry.clone(), top)
        };

        self.persist(registry, top).await?;
        if is_new {
            debug!("Registry grew; waking icon sync");
            self.new_apps.notify_one();
        }
        Ok(is_new)
    }

    /// Recompute scores in place and return the ranking
    pub async fn rerank(&self, now: NaiveDateTime) -> Vec<RankedApp> {
        let mut registry = self.inner.write().await;
        rank_and_store(&mut registry, now, &self.ranking)
    }

    /// Resolves after the next registry growth (or immediately if one is pending)
    pub async fn new_apps_notified(&self) {
        self.new_apps.notified().await;
    }

    async fn persist(&self, registry: Registry, top: TopSet) -> DeskdockResult<()> {
        let registry_path = self.registry_path.clone();
        let top_apps_path = self.top_apps_path.clone();
        let writer = tokio::task::spawn_blocking(move || {
            registry.save(&registry_path)?;
            top.save(&top_apps_path)
        });
        match writer.await {
            Ok(result) => result.map_err(DeskdockError::from),
            Err(e) => Err(RegistryError::Io {
                path: self.registry_path.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            }
            .into()),
        }
    }
}
