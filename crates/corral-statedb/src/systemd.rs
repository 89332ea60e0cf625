//! `systemd` implementation of [`ServiceController`].

use std::fs;
use std::io;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::SERVICE_TARGET;
use crate::error::StateDbError;
use crate::service::{ServiceController, ServiceDefinition};

const SYSTEMCTL: &str = "systemctl";

/// Manages unit files under a directory and drives them with `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdController {
    unit_dir: Utf8PathBuf,
    systemctl: Utf8PathBuf,
}

impl SystemdController {
    /// Creates a controller writing units into `unit_dir`.
    #[must_use]
    pub fn new(unit_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            systemctl: Utf8PathBuf::from(SYSTEMCTL),
        }
    }

    /// Overrides the `systemctl` binary.
    #[must_use]
    pub fn with_systemctl(mut self, systemctl: impl Into<Utf8PathBuf>) -> Self {
        self.systemctl = systemctl.into();
        self
    }

    /// Path of the unit file for `name`.
    #[must_use]
    pub fn unit_path(&self, name: &str) -> Utf8PathBuf {
        self.unit_dir.join(format!("{name}.service"))
    }

    fn systemctl(&self, operation: &'static str, args: &[&str]) -> Result<(), StateDbError> {
        let service = args.last().copied().unwrap_or_default().to_owned();
        let output = Command::new(&self.systemctl)
            .args(args)
            .output()
            .map_err(|source| StateDbError::Service {
                operation,
                service: service.clone(),
                message: format!("cannot run {}: {source}", self.systemctl),
            })?;
        if output.status.success() {
            debug!(target: SERVICE_TARGET, operation, service, "systemctl succeeded");
            return Ok(());
        }
        Err(StateDbError::Service {
            operation,
            service,
            message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// Renders a unit file for `definition`.
#[must_use]
pub fn render_unit(definition: &ServiceDefinition) -> String {
    format!(
        "[Unit]\n\
         Description={}\n\
         After=network.target\n\
         \n\
         [Service]\n\
         ExecStart={}\n\
         Restart=always\n\
         LimitNOFILE=65000\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        definition.description,
        definition.command_line()
    )
}

impl ServiceController for SystemdController {
    fn installed(&self, name: &str) -> Result<bool, StateDbError> {
        let path = self.unit_path(name);
        match fs::metadata(&path) {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(StateDbError::io("inspect", path, error)),
        }
    }

    fn install(&self, definition: &ServiceDefinition) -> Result<(), StateDbError> {
        let path = self.unit_path(&definition.name);
        write_unit(&path, &render_unit(definition))?;
        self.systemctl("reload", &["daemon-reload"])?;
        self.systemctl("enable", &["enable", &definition.name])?;
        info!(
            target: SERVICE_TARGET,
            service = %definition.name,
            file = %path,
            "service installed"
        );
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), StateDbError> {
        self.systemctl("start", &["start", name])
    }

    fn stop(&self, name: &str) -> Result<(), StateDbError> {
        if !self.installed(name)? {
            return Ok(());
        }
        self.systemctl("stop", &["stop", name])
    }

    fn remove(&self, name: &str) -> Result<(), StateDbError> {
        if !self.installed(name)? {
            debug!(target: SERVICE_TARGET, service = name, "service already removed");
            return Ok(());
        }
        self.stop(name)?;
        self.systemctl("disable", &["disable", name])?;
        let path = self.unit_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(StateDbError::io("remove", path, error)),
        }
        self.systemctl("reload", &["daemon-reload"])?;
        info!(target: SERVICE_TARGET, service = name, "service removed");
        Ok(())
    }
}

fn write_unit(path: &Utf8Path, contents: &str) -> Result<(), StateDbError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|error| StateDbError::io("create directory", parent, error))?;
    }
    fs::write(path, contents).map_err(|error| StateDbError::io("write", path, error))
}
