//! Application registry
//!
//! Persistent record of every user application the watcher has observed, keyed by a
//! sanitized friendly name. Entries are only ever added or updated while the bridge runs;
//! the key set never shrinks. The document format is a pretty-printed JSON object mapping
//! friendly name to entry, alongside a separate top-set document for the device/UI layer.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::RegistryError;

// ----------------------------------------------------------------------------
// App Entry
// ----------------------------------------------------------------------------

/// Usage statistics of one user application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppEntry {
    pub exe_path: String,
    pub friendly_name: String,
    /// Encoded device icon
    pub icon_bin: PathBuf,
    /// Preview image, when one was written
    #[serde(default)]
    pub icon_png: Option<PathBuf>,
    #[serde(default)]
    pub times_run: u64,
    #[serde(default)]
    pub last_run: Option<NaiveDateTime>,
    /// Derived at ranking time and written back for consumers of the document
    #[serde(default)]
    pub score: f64,
}

/// One observation of a running application, ready to be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppObservation {
    pub friendly_name: String,
    pub exe_path: String,
    pub icon_bin: PathBuf,
    pub icon_png: Option<PathBuf>,
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Mapping of friendly name to [`AppEntry`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    entries: BTreeMap<String, AppEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry document; a missing file is an empty registry
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let registry: Self =
            serde_json::from_str(&contents).map_err(|source| RegistryError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        debug!("Loaded {} registry entries from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// Persist the registry, replacing the previous document atomically
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| RegistryError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        write_atomically(path, json.as_bytes())
    }

    /// Record that an application was seen running at `now`.
    ///
    /// Returns `true` when the friendly name was not known before.
    pub fn record_observation(&mut self, observation: AppObservation, now: NaiveDateTime) -> bool {
        let is_new = !self.entries.contains_key(&observation.friendly_name);
        let entry = self
            .entries
            .entry(observation.friendly_name.clone())
            .or_insert_with(|| AppEntry {
                exe_path: observation.exe_path.clone(),
                friendly_name: observation.friendly_name.clone(),
                icon_bin: observation.icon_bin.clone(),
                icon_png: observation.icon_png.clone(),
                times_run: 0,
                last_run: None,
                score: 0.0,
            });
        entry.times_run = entry.times_run.saturating_add(1);
        entry.last_run = Some(now);
        is_new
    }

    /// Insert or replace an entry wholesale
    pub fn insert(&mut self, entry: AppEntry) {
        self.entries.insert(entry.friendly_name.clone(), entry);
    }

    pub fn get(&self, friendly_name: &str) -> Option<&AppEntry> {
        self.entries.get(friendly_name)
    }

    pub fn contains(&self, friendly_name: &str) -> bool {
        self.entries.contains_key(friendly_name)
    }

    /// Write a derived score back into an entry
    pub fn set_score(&mut self, friendly_name: &str, score: f64) {
        if let Some(entry) = self.entries.get_mut(friendly_name) {
            entry.score = score;
        }
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &AppEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Top Set
// ----------------------------------------------------------------------------

/// Highest-ranked friendly names, persisted for the device/UI layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopSet {
    #[serde(rename = "top12")]
    pub names: Vec<String>,
}

impl TopSet {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| RegistryError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| RegistryError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        write_atomically(path, json.as_bytes())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Derive a registry key from a process name.
///
/// Drops the extension, keeps alphanumerics, spaces and underscores, and trims trailing
/// whitespace. Returns `None` when nothing usable remains.
pub fn sanitize_friendly_name(process_name: &str) -> Option<String> {
    let base = match process_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => process_name,
    };
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    let cleaned = cleaned.trim_end();
    if cleaned.trim().is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Write `contents` to a sibling `.tmp` file, then rename it over `path`.
///
/// Readers see either the previous file or the complete new one.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), RegistryError> {
    let io_err = |source| RegistryError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn observation(name: &str) -> AppObservation {
        AppObservation {
            friendly_name: name.to_string(),
            exe_path: format!("/usr/bin/{}", name.to_lowercase()),
            icon_bin: PathBuf::from(format!("lvgl_bin_icons/{name}.bin")),
            icon_png: None,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 22)
            .unwrap()
            .and_hms_opt(18, 47, 12)
            .unwrap()
    }

    #[test]
    fn test_record_observation_creates_then_updates() {
        let mut registry = Registry::new();
        assert!(registry.record_observation(observation("Code"), now()));
        assert!(!registry.record_observation(observation("Code"), now()));

        let entry = registry.get("Code").unwrap();
        assert_eq!(entry.times_run, 2);
        assert_eq!(entry.last_run, Some(now()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sanitize_friendly_name() {
        assert_eq!(sanitize_friendly_name("Code.exe").as_deref(), Some("Code"));
        assert_eq!(
            sanitize_friendly_name("Brother iPrint&Scan.exe").as_deref(),
            Some("Brother iPrintScan")
        );
        assert_eq!(
            sanitize_friendly_name("prusa-slicer.exe").as_deref(),
            Some("prusaslicer")
        );
        assert_eq!(sanitize_friendly_name("firefox").as_deref(), Some("firefox"));
        assert_eq!(sanitize_friendly_name("vlc  .exe").as_deref(), Some("vlc"));
        assert_eq!(sanitize_friendly_name("---.exe"), None);
    }

    #[test]
    fn test_reads_reference_document_format() {
        let json = r#"{
          "vivaldi": {
            "exe_path": "C:\\Vivaldi\\vivaldi.exe",
            "friendly_name": "vivaldi",
            "icon_bin": "lvgl_bin_icons\\vivaldi.bin",
            "icon_png": "user_app_icons\\vivaldi.png",
            "times_run": 3,
            "last_run": "2025-08-22T18:47:12.123456",
            "score": 23.0
          }
        }"#;
        let registry: Registry = serde_json::from_str(json).unwrap();
        let entry = registry.get("vivaldi").unwrap();
        assert_eq!(entry.times_run, 3);
        assert!(entry.last_run.is_some());
    }

    #[test]
    fn test_top_set_uses_reference_key() {
        let top = TopSet::new(vec!["a".to_string(), "b".to_string()]);
        let json = serde_json::to_string(&top).unwrap();
        assert_eq!(json, r#"{"top12":["a","b"]}"#);
    }
}
