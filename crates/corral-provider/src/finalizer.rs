//! Provisioning handed back to the caller after a bootstrap.
//!
//! The finalizer turns the bootstrapped environment plus machine-specific
//! parameters into a [`MachineConfig`] and a [`CloudConfig`], then passes
//! both to a [`CloudConfigExecutor`]. It is never invoked by the bootstrap
//! itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use corral_config::{Config, EnvironPaths};
use corral_statedb::database_service_name;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::info;

use crate::PROVIDER_TARGET;
use crate::error::ProviderError;

/// Packages the state server needs when the package index is refreshed.
pub const STATE_SERVER_PACKAGES: [&str; 3] = ["mongodb-server", "rsyslog-gnutls", "cpu-checker"];

/// Machine `0` is always the bootstrap machine.
pub const BOOTSTRAP_MACHINE_ID: &str = "0";

/// Work a machine agent is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum MachineJob {
    /// Runs workload units.
    HostUnits,
    /// Runs the state server and API.
    ManageEnviron,
}

/// Name of the machine agent service for `namespace`.
#[must_use]
pub fn agent_service_name(namespace: &str) -> String {
    format!("corral-agent-{namespace}")
}

/// Caller-supplied inputs to the finalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeParams {
    /// OS series of the bootstrap machine.
    pub series: String,
    /// Where the machine fetches agent tools from.
    pub tools_url: String,
}

/// Configuration of the bootstrap machine agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MachineConfig {
    /// Machine identifier.
    pub machine_id: String,
    /// Provider instance backing the machine.
    pub instance_id: String,
    /// Jobs assigned to the machine.
    pub jobs: Vec<MachineJob>,
    /// OS series.
    pub series: String,
    /// Tools location.
    pub tools_url: String,
    /// Agent data directory.
    pub data_dir: Utf8PathBuf,
    /// Directory holding this machine's agent configuration.
    pub agent_dir: Utf8PathBuf,
    /// Agent log directory.
    pub log_dir: Utf8PathBuf,
    /// State database port.
    pub state_port: u16,
    /// API port.
    pub api_port: u16,
    /// Environment variables handed to the agent.
    pub agent_environment: BTreeMap<String, String>,
    /// Refresh the package index during provisioning.
    pub enable_os_refresh_update: bool,
    /// Upgrade packages during provisioning.
    pub enable_os_upgrade: bool,
}

/// Host-level provisioning applied before the agent starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudConfig {
    /// Refresh the package index.
    pub apt_update: bool,
    /// Upgrade installed packages.
    pub apt_upgrade: bool,
    /// Packages to install.
    pub packages: Vec<String>,
}

impl CloudConfig {
    /// Shell commands realising this configuration, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        let mut commands = Vec::new();
        if self.apt_update {
            commands.push("apt-get update".to_owned());
        }
        if self.apt_upgrade {
            commands.push("apt-get -y upgrade".to_owned());
        }
        if !self.packages.is_empty() {
            commands.push(format!("apt-get -y install {}", self.packages.join(" ")));
        }
        commands
    }
}

/// Applies a machine configuration and its cloud config.
pub trait CloudConfigExecutor: Send + Sync {
    /// Provisions the bootstrap machine.
    ///
    /// # Errors
    ///
    /// Returns an error when any provisioning step fails.
    fn execute(&self, machine: &MachineConfig, cloud: &CloudConfig) -> Result<(), ProviderError>;
}

/// Deferred provisioning of the bootstrap machine.
pub struct Finalizer {
    config: Config,
    instance_id: String,
    executor: Arc<dyn CloudConfigExecutor>,
}

impl std::fmt::Debug for Finalizer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Finalizer")
            .field("environment", &self.config.name)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl Finalizer {
    /// Creates a finalizer for the instance `instance_id` of `config`.
    #[must_use]
    pub fn new(
        config: Config,
        instance_id: impl Into<String>,
        executor: Arc<dyn CloudConfigExecutor>,
    ) -> Self {
        Self {
            config,
            instance_id: instance_id.into(),
            executor,
        }
    }

    /// Builds the machine configuration for `params`.
    #[must_use]
    pub fn machine_config(&self, params: &FinalizeParams) -> MachineConfig {
        let paths = EnvironPaths::from_config(&self.config);
        let namespace = self.config.namespace();
        let agent_environment = BTreeMap::from([
            ("PROVIDER_TYPE".to_owned(), self.config.provider.to_string()),
            ("NAMESPACE".to_owned(), namespace.clone()),
            ("STORAGE_DIR".to_owned(), paths.storage_dir().to_string()),
            ("AGENT_SERVICE_NAME".to_owned(), agent_service_name(&namespace)),
            ("MONGO_SERVICE_NAME".to_owned(), database_service_name(&namespace)),
        ]);
        MachineConfig {
            machine_id: BOOTSTRAP_MACHINE_ID.to_owned(),
            instance_id: self.instance_id.clone(),
            jobs: vec![MachineJob::ManageEnviron],
            series: params.series.clone(),
            tools_url: params.tools_url.clone(),
            data_dir: paths.root_dir().to_path_buf(),
            agent_dir: paths.bootstrap_agent_dir(),
            log_dir: paths.system_log_dir().to_path_buf(),
            state_port: self.config.state_port,
            api_port: self.config.api_port,
            agent_environment,
            enable_os_refresh_update: self.config.enable_os_refresh_update,
            enable_os_upgrade: self.config.enable_os_upgrade,
        }
    }

    /// Builds the cloud config matching `machine`.
    #[must_use]
    pub fn cloud_config(machine: &MachineConfig) -> CloudConfig {
        let packages = if machine.enable_os_refresh_update {
            STATE_SERVER_PACKAGES.iter().map(|name| (*name).to_owned()).collect()
        } else {
            Vec::new()
        };
        CloudConfig {
            apt_update: machine.enable_os_refresh_update,
            apt_upgrade: machine.enable_os_upgrade,
            packages,
        }
    }

    /// Provisions the bootstrap machine through the executor.
    ///
    /// # Errors
    ///
    /// Propagates the executor's error.
    pub fn finalize(self, params: &FinalizeParams) -> Result<MachineConfig, ProviderError> {
        let machine = self.machine_config(params);
        let cloud = Self::cloud_config(&machine);
        self.executor.execute(&machine, &cloud)?;
        info!(
            target: PROVIDER_TARGET,
            environment = %self.config.name,
            instance_id = %self.instance_id,
            series = %params.series,
            "bootstrap machine provisioned"
        );
        Ok(machine)
    }
}
