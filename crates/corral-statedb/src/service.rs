//! Operating-system service control.
//!
//! Only install, start, stop, remove and the installed check are needed; the
//! mechanics of the service manager sit behind [`ServiceController`].

use crate::error::StateDbError;

/// A service the operating system should keep running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Unit name, unique on the host.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Executable followed by its arguments.
    pub command: Vec<String>,
}

impl ServiceDefinition {
    /// Renders the command as a single shell-safe line.
    #[must_use]
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|arg| quote_arg(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote_arg(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./:=,@+".contains(ch));
    if plain {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Controls host services.
pub trait ServiceController: Send + Sync {
    /// Whether a service with this name is installed.
    ///
    /// # Errors
    ///
    /// Returns an error when the service manager cannot be queried.
    fn installed(&self, name: &str) -> Result<bool, StateDbError>;

    /// Installs (or replaces) a service definition and enables it.
    ///
    /// # Errors
    ///
    /// Returns an error when the definition cannot be written or enabled.
    fn install(&self, definition: &ServiceDefinition) -> Result<(), StateDbError>;

    /// Starts an installed service.
    ///
    /// # Errors
    ///
    /// Returns an error when the service manager refuses to start it.
    fn start(&self, name: &str) -> Result<(), StateDbError>;

    /// Stops a service; stopping a stopped service succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error when the service manager refuses to stop it.
    fn stop(&self, name: &str) -> Result<(), StateDbError>;

    /// Stops and removes a service; removing a missing service succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error when the definition cannot be removed.
    fn remove(&self, name: &str) -> Result<(), StateDbError>;
}
