//! Drives an environment from configuration to a recorded, running state
//! server, unwinding everything on failure.
//!
//! The record is reserved before the provider touches anything, so two
//! concurrent bootstraps of one name cannot both proceed. The record is
//! written only after the admin credential is in place; a failure at any
//! earlier step destroys what the provider created and releases the
//! reservation, leaving no initialized record behind.

use std::sync::Arc;

use corral_config::Config;
use corral_store::{ApiCredentials, EnvironInfo, EnvironInfoStore, StoreError};
use tracing::debug;

use crate::ORCHESTRATOR_TARGET;
use crate::environ::{BootstrapParams, Environ, InstanceProvider};
use crate::error::ProviderError;
use crate::finalizer::Finalizer;
use crate::instance::HardwareCharacteristics;
use crate::phase::BootstrapPhase;
use crate::reporter::BootstrapReporter;

/// An environment whose record is reserved and whose resources are ready.
pub struct PreparedEnviron {
    environ: Box<dyn Environ>,
    info: EnvironInfo,
    phase: BootstrapPhase,
}

impl std::fmt::Debug for PreparedEnviron {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedEnviron")
            .field("info", &self.info)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl PreparedEnviron {
    /// The prepared environment.
    #[must_use]
    pub fn environ(&self) -> &dyn Environ {
        self.environ.as_ref()
    }

    /// The reserved record.
    #[must_use]
    pub const fn info(&self) -> &EnvironInfo {
        &self.info
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> BootstrapPhase {
        self.phase
    }
}

/// Result of a successful bootstrap.
#[derive(Debug)]
pub struct Bootstrapped {
    /// Instance running the state server.
    pub instance_id: String,
    /// Hardware of that instance.
    pub hardware: HardwareCharacteristics,
    /// Deferred provisioning for the caller to run.
    pub finalizer: Finalizer,
    /// The written record.
    pub info: EnvironInfo,
}

/// Tracks the phase of one bootstrap and reports each move.
struct Lifecycle<'a> {
    environment: &'a str,
    phase: BootstrapPhase,
    reporter: &'a dyn BootstrapReporter,
}

impl Lifecycle<'_> {
    fn advance(&mut self, next: BootstrapPhase) -> Result<(), ProviderError> {
        let from = self.phase;
        self.phase = from.transition(next)?;
        self.reporter.phase_changed(self.environment, from, next);
        Ok(())
    }
}

/// Sequences prepare and bootstrap over a provider and a record store.
pub struct BootstrapOrchestrator {
    store: Arc<dyn EnvironInfoStore>,
    provider: Arc<dyn InstanceProvider>,
    reporter: Arc<dyn BootstrapReporter>,
}

impl BootstrapOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        store: Arc<dyn EnvironInfoStore>,
        provider: Arc<dyn InstanceProvider>,
        reporter: Arc<dyn BootstrapReporter>,
    ) -> Self {
        Self {
            store,
            provider,
            reporter,
        }
    }

    /// Validates `config`, reserves its record and prepares the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] for a rejected configuration,
    /// [`ProviderError::AlreadyExists`] when the name is taken, or the
    /// provider's error. A failed provider prepare releases the reservation.
    pub fn prepare(&self, config: &Config) -> Result<PreparedEnviron, ProviderError> {
        config.validate()?;
        let environ = self.provider.open(config)?;
        let mut info = self.store.create_info(&config.name).map_err(|error| match error {
            StoreError::AlreadyExists { name } => ProviderError::AlreadyExists { name },
            other => ProviderError::Store(other),
        })?;
        let mut lifecycle = Lifecycle {
            environment: &config.name,
            phase: BootstrapPhase::Unprepared,
            reporter: self.reporter.as_ref(),
        };

        let prepared = environ
            .config()
            .to_bootstrap_attrs()
            .map_err(ProviderError::from)
            .and_then(|attrs| {
                info.set_bootstrap_config(attrs);
                environ.prepare()
            });
        if let Err(error) = prepared {
            self.reporter
                .bootstrap_failed(&config.name, lifecycle.phase, &error);
            self.abort(&mut lifecycle, None, &info);
            return Err(error);
        }
        lifecycle.advance(BootstrapPhase::Prepared)?;
        Ok(PreparedEnviron {
            environ,
            info,
            phase: lifecycle.phase,
        })
    }

    /// Launches the state server, secures its database and writes the
    /// record.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error after destroying the
    /// provider's resources and the record.
    pub fn bootstrap(
        &self,
        prepared: PreparedEnviron,
        params: &BootstrapParams,
    ) -> Result<Bootstrapped, ProviderError> {
        let PreparedEnviron {
            environ,
            mut info,
            phase,
        } = prepared;
        let name = environ.config().name.clone();
        let mut lifecycle = Lifecycle {
            environment: &name,
            phase,
            reporter: self.reporter.as_ref(),
        };
        match Self::run(&mut lifecycle, environ.as_ref(), &mut info, params) {
            Ok((instance_id, hardware, finalizer)) => Ok(Bootstrapped {
                instance_id,
                hardware,
                finalizer,
                info,
            }),
            Err(error) => {
                self.reporter.bootstrap_failed(&name, lifecycle.phase, &error);
                self.abort(&mut lifecycle, Some(environ.as_ref()), &info);
                Err(error)
            }
        }
    }

    fn run(
        lifecycle: &mut Lifecycle<'_>,
        environ: &dyn Environ,
        info: &mut EnvironInfo,
        params: &BootstrapParams,
    ) -> Result<(String, HardwareCharacteristics, Finalizer), ProviderError> {
        lifecycle.advance(BootstrapPhase::InstanceLaunching)?;
        let instance = environ.launch_instance(params)?;

        lifecycle.advance(BootstrapPhase::DatabaseBootstrapping)?;
        let endpoint = environ.bootstrap_database(&instance, params)?;
        let finalizer = environ.finalizer(&instance)?;

        lifecycle.advance(BootstrapPhase::RecordWriting)?;
        let password = environ
            .config()
            .admin_secret
            .clone()
            .filter(|secret| !secret.is_empty())
            .ok_or(ProviderError::MissingSetting { key: "admin_secret" })?;
        info.set_credentials(ApiCredentials {
            user: params.admin_user.clone(),
            password,
        });
        info.set_endpoint(endpoint);
        info.write()?;

        lifecycle.advance(BootstrapPhase::Bootstrapped)?;
        Ok((instance.id, instance.hardware, finalizer))
    }

    /// Destroys the provider's resources and the record. Failures here are
    /// reported but never replace the error that triggered the abort.
    fn abort(
        &self,
        lifecycle: &mut Lifecycle<'_>,
        environ: Option<&dyn Environ>,
        info: &EnvironInfo,
    ) {
        if let Err(error) = lifecycle.advance(BootstrapPhase::Aborting) {
            self.reporter
                .cleanup_failed(lifecycle.environment, "abort", &error);
            return;
        }
        if let Some(environ) = environ {
            if let Err(error) = environ.destroy() {
                self.reporter
                    .cleanup_failed(lifecycle.environment, "destroy environment", &error);
            }
        }
        match info.destroy() {
            Ok(()) | Err(StoreError::AlreadyRemoved { .. }) => {}
            Err(error) => {
                self.reporter.cleanup_failed(
                    lifecycle.environment,
                    "remove record",
                    &ProviderError::Store(error),
                );
            }
        }
        if let Err(error) = lifecycle.advance(BootstrapPhase::Destroyed) {
            self.reporter
                .cleanup_failed(lifecycle.environment, "abort", &error);
        }
        debug!(
            target: ORCHESTRATOR_TARGET,
            environment = lifecycle.environment,
            "bootstrap unwound"
        );
    }
}
