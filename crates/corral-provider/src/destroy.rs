//! Tear-down of a local environment.
//!
//! Destroying needs root to remove services and containers. An
//! unprivileged caller re-invokes the CLI through `sudo`, and the privileged
//! child performs the actual removal. Every step tolerates resources that
//! are already gone, so a destroy interrupted half way can simply be re-run.

use std::fs;
use std::io;
use std::process::Command;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use corral_config::{Config, EnvironPaths, HOME_ENV_VAR};
use corral_statedb::{ServiceController, database_service_name};
use tracing::{debug, info};

use crate::DESTROY_TARGET;
use crate::error::ProviderError;
use crate::finalizer::agent_service_name;

/// Subcommand the privileged child runs.
pub const DESTROY_SUBCOMMAND: &str = "destroy-environment";

const SUDO: &str = "sudo";
const LXC_LS: &str = "lxc-ls";
const LXC_DESTROY: &str = "lxc-destroy";

/// What a destroy call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// Nothing was provisioned; no action was needed.
    NotBootstrapped,
    /// A privileged child process performed the removal.
    Escalated,
    /// Services, containers and the root directory were removed.
    Destroyed,
}

/// Runs commands with root privileges.
pub trait PrivilegeEscalator: Send + Sync {
    /// Whether the current process already runs as root.
    fn is_root(&self) -> bool;

    /// Runs `args` with root privileges, propagating a failing status.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Escalation`] when the command cannot run or
    /// exits unsuccessfully.
    fn run_privileged(&self, args: &[String]) -> Result<(), ProviderError>;
}

/// Escalates through `sudo`.
#[derive(Debug, Clone)]
pub struct SudoEscalator {
    sudo: Utf8PathBuf,
}

impl Default for SudoEscalator {
    fn default() -> Self {
        Self {
            sudo: Utf8PathBuf::from(SUDO),
        }
    }
}

impl SudoEscalator {
    /// Uses `sudo` from the search path.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the escalation helper.
    #[must_use]
    pub fn with_sudo(mut self, sudo: impl Into<Utf8PathBuf>) -> Self {
        self.sudo = sudo.into();
        self
    }
}

impl PrivilegeEscalator for SudoEscalator {
    fn is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn run_privileged(&self, args: &[String]) -> Result<(), ProviderError> {
        let escalation = |message: String| ProviderError::Escalation {
            program: self.sudo.to_string(),
            message,
        };
        let status = Command::new(&self.sudo)
            .args(args)
            .status()
            .map_err(|error| escalation(error.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(escalation(status.to_string()))
        }
    }
}

/// Lists and destroys the containers of an environment.
pub trait ContainerManager: Send + Sync {
    /// Names of containers starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Container`] when the containers cannot be
    /// listed.
    fn list(&self, prefix: &str) -> Result<Vec<String>, ProviderError>;

    /// Stops and destroys `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Container`] when the container survives.
    fn destroy(&self, name: &str) -> Result<(), ProviderError>;
}

/// [`ContainerManager`] driving the LXC command-line tools.
///
/// A host without the tools has no containers to destroy.
#[derive(Debug, Clone)]
pub struct LxcContainerManager {
    lxc_ls: Utf8PathBuf,
    lxc_destroy: Utf8PathBuf,
}

impl Default for LxcContainerManager {
    fn default() -> Self {
        Self {
            lxc_ls: Utf8PathBuf::from(LXC_LS),
            lxc_destroy: Utf8PathBuf::from(LXC_DESTROY),
        }
    }
}

impl LxcContainerManager {
    /// Uses the tools from the search path.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides both tools, for hosts that install them elsewhere.
    #[must_use]
    pub fn with_tools(lxc_ls: impl Into<Utf8PathBuf>, lxc_destroy: impl Into<Utf8PathBuf>) -> Self {
        Self {
            lxc_ls: lxc_ls.into(),
            lxc_destroy: lxc_destroy.into(),
        }
    }
}

impl ContainerManager for LxcContainerManager {
    fn list(&self, prefix: &str) -> Result<Vec<String>, ProviderError> {
        let output = match Command::new(&self.lxc_ls).arg("-1").output() {
            Ok(output) => output,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(
                    target: DESTROY_TARGET,
                    tool = %self.lxc_ls,
                    "container tools not installed"
                );
                return Ok(Vec::new());
            }
            Err(error) => {
                return Err(ProviderError::Container {
                    operation: "list",
                    message: error.to_string(),
                });
            }
        };
        if !output.status.success() {
            return Err(ProviderError::Container {
                operation: "list",
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .filter(|name| name.starts_with(prefix))
            .map(str::to_owned)
            .collect())
    }

    fn destroy(&self, name: &str) -> Result<(), ProviderError> {
        let output = Command::new(&self.lxc_destroy)
            .args(["-f", "-n", name])
            .output()
            .map_err(|error| ProviderError::Container {
                operation: "destroy",
                message: error.to_string(),
            })?;
        if output.status.success() {
            info!(target: DESTROY_TARGET, container = name, "container destroyed");
            return Ok(());
        }
        Err(ProviderError::Container {
            operation: "destroy",
            message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// Arguments handed to the escalation helper to destroy `config`'s
/// environment from a privileged child.
#[must_use]
pub fn privileged_destroy_args(config: &Config, executable: &Utf8Path) -> Vec<String> {
    vec![
        "env".to_owned(),
        format!("{HOME_ENV_VAR}={}", config.home),
        executable.to_string(),
        DESTROY_SUBCOMMAND.to_owned(),
        "-y".to_owned(),
        "--force".to_owned(),
        config.name.clone(),
    ]
}

/// Removes everything a local environment provisioned.
pub struct DestroySequencer {
    services: Arc<dyn ServiceController>,
    containers: Arc<dyn ContainerManager>,
    escalator: Arc<dyn PrivilegeEscalator>,
    executable: Utf8PathBuf,
}

impl DestroySequencer {
    /// Creates a sequencer; `executable` is re-invoked when escalating.
    #[must_use]
    pub fn new(
        services: Arc<dyn ServiceController>,
        containers: Arc<dyn ContainerManager>,
        escalator: Arc<dyn PrivilegeEscalator>,
        executable: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            services,
            containers,
            escalator,
            executable: executable.into(),
        }
    }

    /// Destroys the environment described by `config`.
    ///
    /// # Errors
    ///
    /// Returns the first failure among escalation, service removal,
    /// container destruction and directory removal.
    pub fn destroy(&self, config: &Config) -> Result<DestroyOutcome, ProviderError> {
        let paths = EnvironPaths::from_config(config);
        if !exists(paths.agents_dir())? {
            debug!(
                target: DESTROY_TARGET,
                environment = %config.name,
                "no agents directory; nothing to destroy"
            );
            return Ok(DestroyOutcome::NotBootstrapped);
        }

        if !self.escalator.is_root() {
            let args = privileged_destroy_args(config, &self.executable);
            info!(
                target: DESTROY_TARGET,
                environment = %config.name,
                "re-running destroy with root privileges"
            );
            self.escalator.run_privileged(&args)?;
            return Ok(DestroyOutcome::Escalated);
        }

        let namespace = config.namespace();
        for service in [database_service_name(&namespace), agent_service_name(&namespace)] {
            self.services.remove(&service)?;
            debug!(target: DESTROY_TARGET, service = %service, "service removed");
        }

        let prefix = format!("{namespace}-");
        for container in self.containers.list(&prefix)? {
            self.containers.destroy(&container)?;
        }

        match fs::remove_dir_all(paths.root_dir()) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(ProviderError::io("remove", paths.root_dir(), error)),
        }
        info!(
            target: DESTROY_TARGET,
            environment = %config.name,
            root = %paths.root_dir(),
            "environment destroyed"
        );
        Ok(DestroyOutcome::Destroyed)
    }
}

fn exists(path: &Utf8Path) -> Result<bool, ProviderError> {
    path.as_std_path()
        .try_exists()
        .map_err(|error| ProviderError::io("inspect", path, error))
}
