//! Collaborator traits
//!
//! The bridge reaches the operating system only through these traits. Every method is
//! synchronous; the runtime calls them from the blocking pool so a slow mixer or a hung
//! launcher never stalls the serial link.

use std::path::{Path, PathBuf};

use crate::errors::CollaboratorError;
use crate::icon::IconImage;

// ----------------------------------------------------------------------------
// Icons
// ----------------------------------------------------------------------------

/// Produces an RGB icon for an executable
pub trait IconExtractor: Send + Sync {
    /// Extract the icon of `exe_path`, scaled to `width` x `height`
    fn extract_icon(
        &self,
        exe_path: &Path,
        width: u16,
        height: u16,
    ) -> Result<IconImage, CollaboratorError>;
}

// ----------------------------------------------------------------------------
// OS Settings
// ----------------------------------------------------------------------------

/// Volume and brightness getters/setters, values 0-100.
///
/// Setters receive the device's value unvalidated; clamping is the implementation's call.
pub trait SystemControls: Send + Sync {
    fn volume(&self) -> Result<u8, CollaboratorError>;
    fn set_volume(&self, level: i64) -> Result<(), CollaboratorError>;
    fn brightness(&self) -> Result<u8, CollaboratorError>;
    fn set_brightness(&self, level: i64) -> Result<(), CollaboratorError>;
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Executes a named device command (key combination, app launch)
pub trait CommandDispatcher: Send + Sync {
    fn dispatch(&self, command: &str) -> Result<(), CollaboratorError>;
}

// ----------------------------------------------------------------------------
// Applications
// ----------------------------------------------------------------------------

/// A running user application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedApp {
    pub pid: u32,
    pub exe_path: PathBuf,
    /// Process name as the OS reports it, extension included
    pub display_name: String,
}

/// Lists the user applications currently running
pub trait AppEnumerator: Send + Sync {
    fn list_user_applications(&self) -> Result<Vec<ObservedApp>, CollaboratorError>;
}
