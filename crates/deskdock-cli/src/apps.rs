//! Application discovery collaborators
//!
//! [`ProcessEnumerator`] reports running processes owned by the current user whose
//! executable lives outside the system directories. [`TileIconExtractor`] stands in for a
//! real icon extractor with a flat tile whose color is derived from the executable path.

use std::path::Path;
use std::sync::Mutex;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use deskdock_core::{AppEnumerator, CollaboratorError, IconExtractor, IconImage, ObservedApp};

use crate::config::AppsConfig;

// ----------------------------------------------------------------------------
// Process Enumerator
// ----------------------------------------------------------------------------

/// [`AppEnumerator`] backed by the `sysinfo` process table
pub struct ProcessEnumerator {
    system: Mutex<System>,
    filter: AppFilter,
}

impl ProcessEnumerator {
    pub fn new(config: &AppsConfig) -> Self {
        Self {
            system: Mutex::new(System::new()),
            filter: AppFilter::new(config),
        }
    }
}

impl AppEnumerator for ProcessEnumerator {
    fn list_user_applications(&self) -> Result<Vec<ObservedApp>, CollaboratorError> {
        let failed = |reason: &str| CollaboratorError::Failed {
            operation: "list_user_applications".to_string(),
            reason: reason.to_string(),
        };

        let mut system = self.system.lock().map_err(|_| failed("process table lock poisoned"))?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_user(UpdateKind::OnlyIfNotSet)
                .with_exe(UpdateKind::OnlyIfNotSet),
        );

        let own_pid = sysinfo::get_current_pid().map_err(failed)?;
        let own_user = system
            .process(own_pid)
            .and_then(|process| process.user_id())
            .cloned()
            .ok_or_else(|| failed("cannot determine the current user"))?;

        let mut apps: Vec<ObservedApp> = system
            .processes()
            .iter()
            .filter(|(pid, _)| **pid != own_pid)
            .filter(|(_, process)| process.user_id() == Some(&own_user))
            .filter_map(|(pid, process)| {
                let exe = process.exe()?;
                let name = process.name().to_string_lossy().into_owned();
                self.filter.accepts(&name, exe).then(|| ObservedApp {
                    pid: pid.as_u32(),
                    exe_path: exe.to_path_buf(),
                    display_name: name,
                })
            })
            .collect();
        apps.sort_by_key(|app| app.pid);
        Ok(apps)
    }
}

/// Deny list and system directory rules
#[derive(Debug, Clone)]
pub struct AppFilter {
    deny_list: Vec<String>,
    system_dirs: Vec<String>,
}

impl AppFilter {
    pub fn new(config: &AppsConfig) -> Self {
        Self {
            deny_list: config.deny_list.iter().map(|name| name.to_lowercase()).collect(),
            system_dirs: config
                .system_dirs
                .iter()
                .map(|dir| normalize(dir))
                .collect(),
        }
    }

    /// Whether a process with this name and executable is a user application
    pub fn accepts(&self, name: &str, exe: &Path) -> bool {
        if exe.as_os_str().is_empty() {
            return false;
        }
        let name = name.to_lowercase();
        if self.deny_list.iter().any(|denied| *denied == name) {
            return false;
        }
        let exe = normalize(exe);
        !self
            .system_dirs
            .iter()
            .any(|dir| exe.starts_with(dir.as_str()) && exe[dir.len()..].starts_with('/'))
    }
}

/// Lowercased path with forward slashes, for prefix comparison across platforms
fn normalize(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .trim_end_matches('/')
        .to_lowercase()
}

// ----------------------------------------------------------------------------
// Tile Icons
// ----------------------------------------------------------------------------

/// [`IconExtractor`] that draws a flat tile per executable
#[derive(Debug, Clone, Copy, Default)]
pub struct TileIconExtractor;

impl TileIconExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Stable tile color of an executable
    pub fn tile_color(exe_path: &Path) -> [u8; 3] {
        let hash = crc32fast::hash(exe_path.to_string_lossy().as_bytes()).to_le_bytes();
        // Keep channels away from black so tiles read on a dark screen
        [
            64 + hash[0] % 160,
            64 + hash[1] % 160,
            64 + hash[2] % 160,
        ]
    }
}

impl IconExtractor for TileIconExtractor {
    fn extract_icon(
        &self,
        exe_path: &Path,
        width: u16,
        height: u16,
    ) -> Result<IconImage, CollaboratorError> {
        if width == 0 || height == 0 {
            return Err(CollaboratorError::Failed {
                operation: "extract_icon".to_string(),
                reason: format!("invalid size {width}x{height}"),
            });
        }
        Ok(IconImage::solid(width, height, Self::tile_color(exe_path)))
    }
}
