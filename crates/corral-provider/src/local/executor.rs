//! Provisions the bootstrap machine on the invoking host.

use std::fs;
use std::process::Command;
use std::sync::Arc;

use camino::Utf8PathBuf;
use corral_statedb::{ServiceController, ServiceDefinition};
use tracing::{debug, info};

use crate::LOCAL_TARGET;
use crate::error::ProviderError;
use crate::finalizer::{CloudConfig, CloudConfigExecutor, MachineConfig};

const SHELL: &str = "/bin/sh";
const AGENT_CONF: &str = "agent.conf";
const AGENT_BINARY: &str = "corral-agent";
const AGENT_SERVICE_KEY: &str = "AGENT_SERVICE_NAME";

/// Runs the cloud config commands, writes the agent configuration and
/// installs the machine agent service.
pub struct LocalCloudConfigExecutor {
    services: Arc<dyn ServiceController>,
    shell: Utf8PathBuf,
}

impl LocalCloudConfigExecutor {
    /// Installs the agent through `services`.
    #[must_use]
    pub fn new(services: Arc<dyn ServiceController>) -> Self {
        Self {
            services,
            shell: Utf8PathBuf::from(SHELL),
        }
    }

    /// Overrides the shell running provisioning commands.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<Utf8PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    fn run(&self, command: &str) -> Result<(), ProviderError> {
        let provisioning = |message: String| ProviderError::Provisioning {
            command: command.to_owned(),
            message,
        };
        let status = Command::new(&self.shell)
            .args(["-c", command])
            .status()
            .map_err(|error| provisioning(error.to_string()))?;
        if !status.success() {
            return Err(provisioning(status.to_string()));
        }
        debug!(target: LOCAL_TARGET, command, "provisioning command succeeded");
        Ok(())
    }
}

/// Service running the machine agent described by `machine`.
///
/// # Errors
///
/// Returns [`ProviderError::MissingSetting`] when the agent environment
/// does not name the service.
pub fn agent_service(machine: &MachineConfig) -> Result<ServiceDefinition, ProviderError> {
    let name = machine
        .agent_environment
        .get(AGENT_SERVICE_KEY)
        .cloned()
        .ok_or(ProviderError::MissingSetting {
            key: AGENT_SERVICE_KEY,
        })?;
    let binary = machine.data_dir.join("tools").join(AGENT_BINARY);
    Ok(ServiceDefinition {
        description: format!("corral machine agent ({name})"),
        name,
        command: vec![
            binary.to_string(),
            "machine".to_owned(),
            "--data-dir".to_owned(),
            machine.data_dir.to_string(),
            "--machine-id".to_owned(),
            machine.machine_id.clone(),
        ],
    })
}

impl CloudConfigExecutor for LocalCloudConfigExecutor {
    fn execute(&self, machine: &MachineConfig, cloud: &CloudConfig) -> Result<(), ProviderError> {
        for command in cloud.commands() {
            self.run(&command)?;
        }

        let agent_dir = &machine.agent_dir;
        fs::create_dir_all(agent_dir)
            .map_err(|error| ProviderError::io("create directory", agent_dir, error))?;
        let rendered =
            serde_saphyr::to_string(machine).map_err(|error| ProviderError::Provisioning {
                command: format!("render {AGENT_CONF}"),
                message: error.to_string(),
            })?;
        let conf = agent_dir.join(AGENT_CONF);
        fs::write(&conf, rendered).map_err(|error| ProviderError::io("write", &conf, error))?;

        let service = agent_service(machine)?;
        self.services.install(&service)?;
        self.services.start(&service.name)?;
        info!(
            target: LOCAL_TARGET,
            machine = %machine.machine_id,
            service = %service.name,
            "machine agent installed"
        );
        Ok(())
    }
}
