//! deskdock CLI library
//!
//! Configuration loading, command handlers and the host-side collaborators (shell
//! controls, action table, process enumerator, tile icons) behind the `deskdock` binary.

pub mod apps;
pub mod cli;
pub mod commands;
pub mod config;
pub mod controls;
pub mod error;

pub use apps::{AppFilter, ProcessEnumerator, TileIconExtractor};
pub use cli::{Cli, Commands};
pub use commands::CommandRunner;
pub use config::{AppConfig, AppsConfig, ControlsConfig};
pub use controls::{Action, ActionTable, ShellControls};
pub use error::{CliError, Result};
