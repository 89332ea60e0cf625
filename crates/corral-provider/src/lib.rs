//! Environment providers and the bootstrap lifecycle.
//!
//! An [`InstanceProvider`] opens an [`Environ`] for a configuration. The
//! [`BootstrapOrchestrator`] drives that environment through
//! [`BootstrapPhase`]s: it reserves the environment record, lets the
//! provider prepare its resources and launch the state server, secures the
//! state database and only then writes the record. Any failure unwinds what
//! was created. [`DestroySequencer`] removes a local environment, escalating
//! through `sudo` when needed.
//!
//! The local provider is the only real backend; `azure` and `ec2` are
//! selectable but answer every operation with
//! [`ProviderError::NotImplemented`].

mod certs;
mod constraints;
mod destroy;
mod environ;
mod error;
mod finalizer;
mod instance;
mod local;
mod orchestrator;
mod phase;
mod reporter;
mod storage;
mod unimplemented;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use corral_config::ProviderKind;

pub use self::certs::{SERVER_HOSTNAMES, TlsMaterial, read_ca_cert};
pub use self::constraints::{
    ConstraintKey, Constraints, ConstraintsError, ConstraintsValidator, KNOWN_ARCHES, host_arch,
};
pub use self::destroy::{
    ContainerManager, DESTROY_SUBCOMMAND, DestroyOutcome, DestroySequencer, LxcContainerManager,
    PrivilegeEscalator, SudoEscalator, privileged_destroy_args,
};
pub use self::environ::{BootstrapParams, DEFAULT_ADMIN_USER, Environ, InstanceProvider};
pub use self::error::ProviderError;
pub use self::finalizer::{
    BOOTSTRAP_MACHINE_ID, CloudConfig, CloudConfigExecutor, FinalizeParams, Finalizer,
    MachineConfig, MachineJob, STATE_SERVER_PACKAGES, agent_service_name,
};
pub use self::instance::{HardwareCharacteristics, Instance, LaunchedInstance, Port};
pub use self::local::{
    LOCAL_INSTANCE_ID, LocalCloudConfigExecutor, LocalEnviron, LocalInstance, LocalProvider,
    LocalRuntime, PROTECTED_DIRS, UNSUPPORTED_CONSTRAINTS, agent_service, check_root,
};
pub use self::orchestrator::{BootstrapOrchestrator, Bootstrapped, PreparedEnviron};
pub use self::phase::BootstrapPhase;
pub use self::reporter::{BootstrapReporter, StructuredReporter};
pub use self::storage::{DirectoryStorage, Storage};
pub use self::unimplemented::{UnimplementedEnviron, UnimplementedInstance, UnimplementedProvider};

pub(crate) const PROVIDER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::provider");
pub(crate) const STORAGE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::storage");
pub(crate) const DESTROY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::destroy");
pub(crate) const LOCAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::local");
pub(crate) const ORCHESTRATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::orchestrator");

/// Selects the provider for `kind`; `runtime` backs the local provider.
#[must_use]
pub fn open_provider(kind: ProviderKind, runtime: LocalRuntime) -> Arc<dyn InstanceProvider> {
    match kind {
        ProviderKind::Local => Arc::new(LocalProvider::new(runtime)),
        ProviderKind::Azure | ProviderKind::Ec2 => Arc::new(UnimplementedProvider::new(kind)),
    }
}
