//! Errors surfaced by providers, the orchestrator and the destroy sequence.

use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use corral_config::{ConfigError, ProviderKind};
use corral_statedb::StateDbError;
use corral_store::StoreError;
use thiserror::Error;

use crate::constraints::ConstraintsError;
use crate::phase::BootstrapPhase;

/// Errors raised while preparing, bootstrapping or destroying an environment.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The configuration was rejected before anything was touched.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ConfigError),

    /// A required setting is absent.
    #[error("{key} must be set")]
    MissingSetting {
        /// Configuration key.
        key: &'static str,
    },

    /// The environment already has a record.
    #[error("environment '{name}' already exists")]
    AlreadyExists {
        /// Environment name.
        name: String,
    },

    /// The environment has not been bootstrapped.
    #[error("environment is not bootstrapped")]
    NotBootstrapped,

    /// The backend does not implement the requested operation.
    #[error("{operation} is not implemented by the {provider} provider")]
    NotImplemented {
        /// Provider kind.
        provider: ProviderKind,
        /// Operation that was requested.
        operation: &'static str,
    },

    /// The root directory sits under a protected system location.
    #[error("root directory '{path}' is under protected system directory '{protected}'")]
    ProtectedRoot {
        /// Configured root directory.
        path: Utf8PathBuf,
        /// Protected prefix it falls under.
        protected: &'static str,
    },

    /// The root directory is not an absolute path.
    #[error("root directory '{path}' must be an absolute path")]
    RelativeRoot {
        /// Configured root directory.
        path: Utf8PathBuf,
    },

    /// A filesystem operation failed.
    #[error("failed to {operation} '{path}': {source}")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// TLS material could not be generated.
    #[error("failed to generate {what}: {message}")]
    Certificate {
        /// Certificate being generated.
        what: &'static str,
        /// Reason reported by the generator.
        message: String,
    },

    /// A constraint was rejected.
    #[error(transparent)]
    Constraints(#[from] ConstraintsError),

    /// The record store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The state database bootstrap failed.
    #[error(transparent)]
    StateDb(#[from] StateDbError),

    /// The privileged re-invocation failed.
    #[error("privileged destroy via '{program}' failed: {message}")]
    Escalation {
        /// Escalation helper that was run.
        program: String,
        /// Exit status or spawn failure.
        message: String,
    },

    /// A container could not be inspected or destroyed.
    #[error("container operation '{operation}' failed: {message}")]
    Container {
        /// Operation that failed.
        operation: &'static str,
        /// Reason reported by the container tooling.
        message: String,
    },

    /// A provisioning command failed while finalizing.
    #[error("provisioning command `{command}` failed: {message}")]
    Provisioning {
        /// Command that failed.
        command: String,
        /// Exit status or spawn failure.
        message: String,
    },

    /// A lifecycle step was requested out of order.
    #[error("illegal bootstrap transition from {from} to {to}")]
    IllegalTransition {
        /// Current phase.
        from: BootstrapPhase,
        /// Requested phase.
        to: BootstrapPhase,
    },

    /// The provider knows no instance with this identifier.
    #[error("instance '{id}' not found")]
    UnknownInstance {
        /// Requested identifier.
        id: String,
    },

    /// A storage object name escaped the storage directory.
    #[error("invalid storage name '{name}'")]
    InvalidStorageName {
        /// Offending name.
        name: String,
    },

    /// A storage object does not exist.
    #[error("storage object '{name}' not found")]
    StorageNotFound {
        /// Object name.
        name: String,
    },

    /// A storage object path cannot be expressed as a `file` URL.
    #[error("cannot build a URL for storage path '{path}'")]
    StorageUrl {
        /// Object path, which must be absolute.
        path: Utf8PathBuf,
    },
}

impl ProviderError {
    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<Utf8PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) const fn not_implemented(provider: ProviderKind, operation: &'static str) -> Self {
        Self::NotImplemented {
            provider,
            operation,
        }
    }
}
