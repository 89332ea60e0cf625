//! Backends that can be selected but not yet driven.

use corral_config::{Config, ProviderKind};
use corral_store::ApiEndpoint;
use tracing::warn;

use crate::PROVIDER_TARGET;
use crate::constraints::ConstraintsValidator;
use crate::destroy::DestroyOutcome;
use crate::environ::{BootstrapParams, Environ, InstanceProvider};
use crate::error::ProviderError;
use crate::finalizer::Finalizer;
use crate::instance::{Instance, LaunchedInstance, Port};
use crate::storage::Storage;

/// Provider whose environments refuse every operation.
#[derive(Debug, Clone, Copy)]
pub struct UnimplementedProvider {
    kind: ProviderKind,
}

impl UnimplementedProvider {
    /// Stands in for `kind`.
    #[must_use]
    pub const fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }
}

impl InstanceProvider for UnimplementedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn open(&self, config: &Config) -> Result<Box<dyn Environ>, ProviderError> {
        warn!(
            target: PROVIDER_TARGET,
            provider = %self.kind,
            environment = %config.name,
            "provider is not implemented; every operation will fail"
        );
        Ok(Box::new(UnimplementedEnviron {
            kind: self.kind,
            config: config.clone(),
        }))
    }
}

/// Environment of an [`UnimplementedProvider`].
#[derive(Debug, Clone)]
pub struct UnimplementedEnviron {
    kind: ProviderKind,
    config: Config,
}

impl UnimplementedEnviron {
    const fn refuse(&self, operation: &'static str) -> ProviderError {
        ProviderError::not_implemented(self.kind, operation)
    }
}

impl Environ for UnimplementedEnviron {
    fn config(&self) -> &Config {
        &self.config
    }

    fn prepare(&self) -> Result<(), ProviderError> {
        Err(self.refuse("prepare"))
    }

    fn launch_instance(
        &self,
        _params: &BootstrapParams,
    ) -> Result<LaunchedInstance, ProviderError> {
        Err(self.refuse("launch instance"))
    }

    fn bootstrap_database(
        &self,
        _instance: &LaunchedInstance,
        _params: &BootstrapParams,
    ) -> Result<ApiEndpoint, ProviderError> {
        Err(self.refuse("bootstrap database"))
    }

    fn finalizer(&self, _instance: &LaunchedInstance) -> Result<Finalizer, ProviderError> {
        Err(self.refuse("finalize"))
    }

    fn instances(&self, _ids: &[String]) -> Result<Vec<Box<dyn Instance>>, ProviderError> {
        Err(self.refuse("instances"))
    }

    fn state_server_instances(&self) -> Result<Vec<String>, ProviderError> {
        Err(self.refuse("state server instances"))
    }

    fn constraints_validator(&self) -> Result<ConstraintsValidator, ProviderError> {
        Err(self.refuse("constraints validator"))
    }

    fn supported_architectures(&self) -> Result<Vec<String>, ProviderError> {
        Err(self.refuse("supported architectures"))
    }

    fn supports_networks(&self) -> bool {
        false
    }

    fn tools_sources(&self) -> Result<Vec<String>, ProviderError> {
        Err(self.refuse("tools sources"))
    }

    fn storage(&self) -> Result<Box<dyn Storage>, ProviderError> {
        Err(self.refuse("storage"))
    }

    fn destroy(&self) -> Result<DestroyOutcome, ProviderError> {
        Err(self.refuse("destroy"))
    }
}

/// Instance of a backend without an instance API.
#[derive(Debug, Clone)]
pub struct UnimplementedInstance {
    kind: ProviderKind,
    id: String,
}

impl UnimplementedInstance {
    /// Stands in for instance `id` of `kind`.
    #[must_use]
    pub fn new(kind: ProviderKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl Instance for UnimplementedInstance {
    fn id(&self) -> &str {
        &self.id
    }

    fn dns_name(&self) -> Result<String, ProviderError> {
        Err(ProviderError::not_implemented(self.kind, "dns name"))
    }

    fn wait_dns_name(&self) -> Result<String, ProviderError> {
        Err(ProviderError::not_implemented(self.kind, "wait dns name"))
    }

    fn open_ports(&self, _machine_id: &str, _ports: &[Port]) -> Result<(), ProviderError> {
        Err(ProviderError::not_implemented(self.kind, "open ports"))
    }

    fn close_ports(&self, _machine_id: &str, _ports: &[Port]) -> Result<(), ProviderError> {
        Err(ProviderError::not_implemented(self.kind, "close ports"))
    }

    fn ports(&self, _machine_id: &str) -> Result<Vec<Port>, ProviderError> {
        Err(ProviderError::not_implemented(self.kind, "ports"))
    }
}
