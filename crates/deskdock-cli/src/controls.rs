//! Shell-backed OS collaborators
//!
//! [`ShellControls`] drives volume and brightness through configurable command templates,
//! and [`ActionTable`] maps device command keys to programs to launch or shell actions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

use deskdock_core::{CollaboratorError, CommandDispatcher, SystemControls};

use crate::config::ControlsConfig;

// ----------------------------------------------------------------------------
// Shell Helpers
// ----------------------------------------------------------------------------

fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

/// Run `command` to completion and return its stdout
fn run_shell(operation: &str, command: &str) -> Result<String, CollaboratorError> {
    let failed = |reason: String| CollaboratorError::Failed {
        operation: operation.to_string(),
        reason,
    };

    let output = shell(command)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| failed(e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!("{} ({})", output.status, stderr.trim())));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Fill `{value}` in a setter template
pub fn render_template(template: &str, value: u8) -> String {
    template.replace("{value}", &value.to_string())
}

/// Read a 0-100 level from command output.
///
/// The first number followed by `%` wins; otherwise the first integer.
pub fn parse_level(output: &str) -> Option<u8> {
    let bytes = output.as_bytes();
    let mut numbers = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let percent = bytes.get(i) == Some(&b'%');
            numbers.push((&output[start..i], percent));
        } else {
            i += 1;
        }
    }

    let (digits, _) = numbers
        .iter()
        .find(|(_, percent)| *percent)
        .or_else(|| numbers.first())?;
    let value: u64 = digits.parse().ok()?;
    Some(value.min(100) as u8)
}

// ----------------------------------------------------------------------------
// Shell Controls
// ----------------------------------------------------------------------------

/// [`SystemControls`] over shell command templates
#[derive(Debug, Clone)]
pub struct ShellControls {
    templates: ControlsConfig,
}

impl ShellControls {
    pub fn new(templates: ControlsConfig) -> Self {
        Self { templates }
    }

    fn get(&self, operation: &str, template: &str) -> Result<u8, CollaboratorError> {
        if template.trim().is_empty() {
            return Err(CollaboratorError::Unsupported {
                operation: operation.to_string(),
            });
        }
        let output = run_shell(operation, template)?;
        parse_level(&output).ok_or_else(|| CollaboratorError::Failed {
            operation: operation.to_string(),
            reason: format!("no level in output {:?}", output.trim()),
        })
    }

    fn set(&self, operation: &str, template: &str, level: i64) -> Result<(), CollaboratorError> {
        if template.trim().is_empty() {
            return Err(CollaboratorError::Unsupported {
                operation: operation.to_string(),
            });
        }
        let value = level.clamp(0, 100) as u8;
        let command = render_template(template, value);
        debug!("{}: {}", operation, command);
        run_shell(operation, &command).map(|_| ())
    }
}

impl SystemControls for ShellControls {
    fn volume(&self) -> Result<u8, CollaboratorError> {
        self.get("get_volume", &self.templates.volume_get)
    }

    fn set_volume(&self, level: i64) -> Result<(), CollaboratorError> {
        self.set("set_volume", &self.templates.volume_set, level)
    }

    fn brightness(&self) -> Result<u8, CollaboratorError> {
        self.get("get_brightness", &self.templates.brightness_get)
    }

    fn set_brightness(&self, level: i64) -> Result<(), CollaboratorError> {
        self.set("set_brightness", &self.templates.brightness_set, level)
    }
}

// ----------------------------------------------------------------------------
// Action Table
// ----------------------------------------------------------------------------

/// What a device command key does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    /// Start a program detached from the bridge
    Launch {
        launch: PathBuf,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
    /// Run a shell command and wait for it
    Shell { shell: String },
}

impl Action {
    pub fn is_empty(&self) -> bool {
        match self {
            Action::Launch { launch, .. } => launch.as_os_str().is_empty(),
            Action::Shell { shell } => shell.trim().is_empty(),
        }
    }
}

/// [`CommandDispatcher`] over a fixed key-to-action table
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    actions: BTreeMap<String, Action>,
}

impl ActionTable {
    pub fn new(actions: BTreeMap<String, Action>) -> Self {
        Self { actions }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

impl CommandDispatcher for ActionTable {
    fn dispatch(&self, command: &str) -> Result<(), CollaboratorError> {
        let operation = format!("command '{command}'");
        let action = self
            .actions
            .get(command)
            .ok_or_else(|| CollaboratorError::Failed {
                operation: operation.clone(),
                reason: "no action configured".to_string(),
            })?;

        match action {
            Action::Launch { launch, args } => {
                let mut child = Command::new(launch)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| CollaboratorError::Failed {
                        operation,
                        reason: format!("{}: {}", launch.display(), e),
                    })?;
                info!("Launched {} (pid {})", launch.display(), child.id());
                // The program outlives the request; reap it whenever it exits
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
                Ok(())
            }
            Action::Shell { shell } => run_shell(&operation, shell).map(|_| ()),
        }
    }
}
