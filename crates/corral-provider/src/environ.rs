//! Provider and environment capabilities.

use corral_config::{Config, ProviderKind};
use corral_store::ApiEndpoint;

use crate::constraints::{Constraints, ConstraintsValidator};
use crate::destroy::DestroyOutcome;
use crate::error::ProviderError;
use crate::finalizer::Finalizer;
use crate::instance::{Instance, LaunchedInstance};
use crate::storage::Storage;

/// Name given to the administrative principal unless overridden.
pub const DEFAULT_ADMIN_USER: &str = "admin";

/// Inputs to a bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapParams {
    /// Administrative principal created in the state database.
    pub admin_user: String,
    /// Constraints on the state server instance.
    pub constraints: Constraints,
}

impl Default for BootstrapParams {
    fn default() -> Self {
        Self {
            admin_user: DEFAULT_ADMIN_USER.to_owned(),
            constraints: Constraints::empty(),
        }
    }
}

/// Opens environments of one backend kind.
pub trait InstanceProvider: Send + Sync {
    /// Backend kind served by this provider.
    fn kind(&self) -> ProviderKind;

    /// Opens the environment described by `config` without side effects.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is unusable for this backend.
    fn open(&self, config: &Config) -> Result<Box<dyn Environ>, ProviderError>;
}

/// One environment managed by a provider.
pub trait Environ: Send + Sync {
    /// Configuration the environment was opened with.
    fn config(&self) -> &Config;

    /// Creates the directories and TLS material the bootstrap relies on.
    ///
    /// # Errors
    ///
    /// Returns an error when the environment's resources cannot be created.
    fn prepare(&self) -> Result<(), ProviderError>;

    /// Starts the state server instance.
    ///
    /// # Errors
    ///
    /// Returns an error when the constraints are rejected or the instance
    /// cannot be started.
    fn launch_instance(&self, params: &BootstrapParams) -> Result<LaunchedInstance, ProviderError>;

    /// Injects the admin credential into the instance's state database and
    /// returns the API endpoint clients should use.
    ///
    /// # Errors
    ///
    /// Returns an error when the admin bootstrap fails.
    fn bootstrap_database(
        &self,
        instance: &LaunchedInstance,
        params: &BootstrapParams,
    ) -> Result<ApiEndpoint, ProviderError>;

    /// Deferred provisioning for `instance`.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot provision machines.
    fn finalizer(&self, instance: &LaunchedInstance) -> Result<Finalizer, ProviderError>;

    /// Instances with the given identifiers.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot be queried.
    fn instances(&self, ids: &[String]) -> Result<Vec<Box<dyn Instance>>, ProviderError>;

    /// Identifiers of the instances running the state server.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotBootstrapped`] when no state server has
    /// been provisioned.
    fn state_server_instances(&self) -> Result<Vec<String>, ProviderError>;

    /// Validator describing the constraints this backend honours.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot describe its constraints.
    fn constraints_validator(&self) -> Result<ConstraintsValidator, ProviderError>;

    /// Architectures instances may run.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot be queried.
    fn supported_architectures(&self) -> Result<Vec<String>, ProviderError>;

    /// Whether the backend manages networks.
    fn supports_networks(&self) -> bool;

    /// URLs searched for agent tools.
    ///
    /// # Errors
    ///
    /// Returns an error when the storage cannot produce a URL.
    fn tools_sources(&self) -> Result<Vec<String>, ProviderError>;

    /// Storage shared with the environment's machines.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend has no storage.
    fn storage(&self) -> Result<Box<dyn Storage>, ProviderError>;

    /// Tears the environment down.
    ///
    /// # Errors
    ///
    /// Returns an error when a resource cannot be removed.
    fn destroy(&self) -> Result<DestroyOutcome, ProviderError>;
}
