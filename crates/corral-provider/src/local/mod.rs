//! The local provider: a state server on the invoking host.
//!
//! The environment lives under a root directory (`<home>/<name>` unless
//! configured). Preparing creates the tree and the TLS material; the launch
//! clears leftovers from earlier runs; the database bootstrap drives the
//! [`AdminBootstrapper`] against the host's database service. The agents
//! directory only appears once the finalizer provisions machine `0`, and its
//! presence is what marks the environment as bootstrapped.

mod executor;
mod instance;

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::sync::Arc;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use corral_config::{Config, EnvironPaths, ProviderKind};
use corral_statedb::{
    AdminBootstrapParams, AdminBootstrapper, MongoShell, MongoShellDialer, MongodLauncher,
    ProcessLauncher, ServiceController, SessionDialer, SystemdController,
};
use corral_store::ApiEndpoint;
use nix::unistd::{AccessFlags, access};
use tracing::{debug, info, warn};

use crate::LOCAL_TARGET;
use crate::certs;
use crate::constraints::{ConstraintKey, ConstraintsValidator, host_arch};
use crate::destroy::{
    ContainerManager, DestroyOutcome, DestroySequencer, LxcContainerManager, PrivilegeEscalator,
    SudoEscalator,
};
use crate::environ::{BootstrapParams, Environ, InstanceProvider};
use crate::error::ProviderError;
use crate::finalizer::{CloudConfigExecutor, Finalizer};
use crate::instance::{HardwareCharacteristics, Instance, LaunchedInstance};
use crate::storage::{DirectoryStorage, Storage};

pub use self::executor::{LocalCloudConfigExecutor, agent_service};
pub use self::instance::{LOCAL_INSTANCE_ID, LocalInstance};

/// System directories a root directory may never live under.
pub const PROTECTED_DIRS: [&str; 10] = [
    "/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc", "/boot", "/dev", "/proc", "/sys",
];

/// Constraints the local provider ignores.
pub const UNSUPPORTED_CONSTRAINTS: [ConstraintKey; 4] = [
    ConstraintKey::CpuCores,
    ConstraintKey::CpuPower,
    ConstraintKey::InstanceType,
    ConstraintKey::Tags,
];

const TOOLS_OBJECT: &str = "tools";

/// Host capabilities the local provider drives.
#[derive(Clone)]
pub struct LocalRuntime {
    /// Service manager for the database and agent services.
    pub services: Arc<dyn ServiceController>,
    /// Launcher for the transient database.
    pub launcher: Arc<dyn ProcessLauncher>,
    /// Dialer for database sessions.
    pub dialer: Arc<dyn SessionDialer>,
    /// Provisioner invoked by the finalizer.
    pub executor: Arc<dyn CloudConfigExecutor>,
    /// Container tooling used by destroy.
    pub containers: Arc<dyn ContainerManager>,
    /// Privilege escalation used by destroy.
    pub escalator: Arc<dyn PrivilegeEscalator>,
    /// Executable re-invoked by an escalated destroy.
    pub executable: Utf8PathBuf,
}

impl LocalRuntime {
    /// Production adapters: systemd, `mongod`, the `mongo` shell, LXC and
    /// `sudo`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Io`] when the current executable cannot be
    /// located.
    pub fn system(config: &Config) -> Result<Self, ProviderError> {
        let services: Arc<dyn ServiceController> =
            Arc::new(SystemdController::new(config.service_dir.clone()));
        let executable = std::env::current_exe()
            .map_err(|error| ProviderError::io("locate", "current executable", error))?;
        let executable = Utf8PathBuf::from_path_buf(executable).map_err(|path| {
            ProviderError::io(
                "locate",
                path.display().to_string(),
                io::Error::new(io::ErrorKind::InvalidData, "executable path is not UTF-8"),
            )
        })?;
        Ok(Self {
            executor: Arc::new(LocalCloudConfigExecutor::new(Arc::clone(&services))),
            services,
            launcher: Arc::new(MongodLauncher),
            dialer: Arc::new(MongoShellDialer::new(MongoShell::new(config.mongo_path.clone()))),
            containers: Arc::new(LxcContainerManager::new()),
            escalator: Arc::new(SudoEscalator::new()),
            executable,
        })
    }
}

/// Opens local environments.
#[derive(Clone)]
pub struct LocalProvider {
    runtime: LocalRuntime,
}

impl LocalProvider {
    /// Creates a provider over `runtime`.
    #[must_use]
    pub const fn new(runtime: LocalRuntime) -> Self {
        Self { runtime }
    }
}

impl InstanceProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn open(&self, config: &Config) -> Result<Box<dyn Environ>, ProviderError> {
        config.validate()?;
        let config = config.resolved();
        let paths = EnvironPaths::from_config(&config);
        check_root(paths.root_dir())?;
        debug!(
            target: LOCAL_TARGET,
            environment = %config.name,
            root = %paths.root_dir(),
            "opened local environment"
        );
        Ok(Box::new(LocalEnviron {
            config,
            paths,
            runtime: self.runtime.clone(),
        }))
    }
}

/// Rejects relative root directories and roots under a protected system
/// location.
///
/// The root is checked both with `.` and `..` removed lexically and with its
/// nearest existing ancestor resolved through symlinks.
///
/// # Errors
///
/// Returns [`ProviderError::RelativeRoot`] for a relative root,
/// [`ProviderError::ProtectedRoot`] naming the protected prefix, or
/// [`ProviderError::Io`] when an existing ancestor cannot be resolved.
pub fn check_root(root: &Utf8Path) -> Result<(), ProviderError> {
    if !root.is_absolute() {
        return Err(ProviderError::RelativeRoot {
            path: root.to_path_buf(),
        });
    }
    let normal = normalize(root);
    let resolved = resolve_existing(&normal)?;
    let protected = [&normal, &resolved].into_iter().find_map(|candidate| {
        PROTECTED_DIRS
            .into_iter()
            .find(|protected| candidate.starts_with(Utf8Path::new(protected)))
    });
    match protected {
        Some(protected) => Err(ProviderError::ProtectedRoot {
            path: root.to_path_buf(),
            protected,
        }),
        None => Ok(()),
    }
}

/// Drops `.` components and applies `..` without touching the filesystem.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut normal = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other),
        }
    }
    normal
}

/// Canonicalizes the nearest existing ancestor of `path` and re-appends the
/// part that does not exist yet.
fn resolve_existing(path: &Utf8Path) -> Result<Utf8PathBuf, ProviderError> {
    let Some(existing) = path
        .ancestors()
        .find(|candidate| candidate.as_std_path().exists())
    else {
        return Ok(path.to_path_buf());
    };
    let canonical = existing
        .canonicalize_utf8()
        .map_err(|error| ProviderError::io("resolve", existing, error))?;
    Ok(path
        .strip_prefix(existing)
        .map_or_else(|_| canonical.clone(), |rest| canonical.join(rest)))
}

/// A local environment.
pub struct LocalEnviron {
    config: Config,
    paths: EnvironPaths,
    runtime: LocalRuntime,
}

impl LocalEnviron {
    fn admin_secret(&self) -> Result<&str, ProviderError> {
        self.config
            .admin_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or(ProviderError::MissingSetting { key: "admin_secret" })
    }

    fn storage_dir(&self) -> DirectoryStorage {
        DirectoryStorage::new(self.paths.storage_dir())
    }

    /// Deletes the output log and replaces the log directory with a link to
    /// the system log directory.
    fn remove_leftovers(&self) -> Result<(), ProviderError> {
        let output_log = self.paths.cloud_init_output_log();
        match fs::remove_file(output_log) {
            Ok(()) => debug!(target: LOCAL_TARGET, path = %output_log, "removed stale output log"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(ProviderError::io("remove", output_log, error)),
        }

        let link = self.paths.log_link();
        match fs::symlink_metadata(link) {
            Ok(metadata) if metadata.is_dir() => {
                fs::remove_dir_all(link).map_err(|error| ProviderError::io("remove", link, error))?;
            }
            Ok(_) => {
                fs::remove_file(link).map_err(|error| ProviderError::io("remove", link, error))?;
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(ProviderError::io("inspect", link, error)),
        }
        symlink(self.paths.system_log_dir(), link)
            .map_err(|error| ProviderError::io("link", link, error))?;
        Ok(())
    }

    fn destroyer(&self) -> DestroySequencer {
        DestroySequencer::new(
            Arc::clone(&self.runtime.services),
            Arc::clone(&self.runtime.containers),
            Arc::clone(&self.runtime.escalator),
            self.runtime.executable.clone(),
        )
    }
}

impl Environ for LocalEnviron {
    fn config(&self) -> &Config {
        &self.config
    }

    fn prepare(&self) -> Result<(), ProviderError> {
        self.admin_secret()?;
        let root = self.paths.root_dir();
        check_writable(root)?;
        for dir in [root, self.paths.db_dir(), self.paths.storage_dir()] {
            fs::create_dir_all(dir)
                .map_err(|error| ProviderError::io("create directory", dir, error))?;
        }
        let material = certs::generate(&self.config.name)?;
        certs::write_material(&self.paths, &material)?;
        info!(
            target: LOCAL_TARGET,
            environment = %self.config.name,
            root = %root,
            "local environment prepared"
        );
        Ok(())
    }

    fn launch_instance(&self, params: &BootstrapParams) -> Result<LaunchedInstance, ProviderError> {
        let unsupported = self.constraints_validator()?.validate(&params.constraints)?;
        if !unsupported.is_empty() {
            let keys: Vec<String> = unsupported.iter().map(ToString::to_string).collect();
            warn!(
                target: LOCAL_TARGET,
                unsupported = %keys.join(","),
                "ignoring unsupported constraints"
            );
        }
        self.remove_leftovers()?;
        let instance = LaunchedInstance {
            id: LOCAL_INSTANCE_ID.to_owned(),
            hardware: HardwareCharacteristics {
                arch: Some(host_arch().to_owned()),
                ..HardwareCharacteristics::default()
            },
            api_addresses: vec![format!("{LOCAL_INSTANCE_ID}:{}", self.config.api_port)],
        };
        info!(
            target: LOCAL_TARGET,
            instance = %instance.id,
            hardware = %instance.hardware,
            "local state server instance ready"
        );
        Ok(instance)
    }

    fn bootstrap_database(
        &self,
        instance: &LaunchedInstance,
        params: &BootstrapParams,
    ) -> Result<ApiEndpoint, ProviderError> {
        let mut admin = AdminBootstrapParams::new(
            &self.config.namespace(),
            &self.config.mongod_path,
            self.paths.db_dir(),
            self.config.state_port,
            &params.admin_user,
            self.admin_secret()?,
        );
        admin.startup_timeout = self.config.db_startup_timeout();
        let bootstrapper = AdminBootstrapper::new(
            Arc::clone(&self.runtime.services),
            Arc::clone(&self.runtime.launcher),
            Arc::clone(&self.runtime.dialer),
        );
        let added = bootstrapper.ensure_admin_user(&admin)?;
        debug!(target: LOCAL_TARGET, instance = %instance.id, added, "state database secured");
        Ok(ApiEndpoint {
            addresses: instance.api_addresses.clone(),
            ca_cert: certs::read_ca_cert(&self.paths)?,
        })
    }

    fn finalizer(&self, instance: &LaunchedInstance) -> Result<Finalizer, ProviderError> {
        Ok(Finalizer::new(
            self.config.clone(),
            instance.id.clone(),
            Arc::clone(&self.runtime.executor),
        ))
    }

    fn instances(&self, ids: &[String]) -> Result<Vec<Box<dyn Instance>>, ProviderError> {
        ids.iter()
            .map(|id| {
                if id == LOCAL_INSTANCE_ID {
                    Ok(Box::new(LocalInstance) as Box<dyn Instance>)
                } else {
                    Err(ProviderError::UnknownInstance { id: id.clone() })
                }
            })
            .collect()
    }

    fn state_server_instances(&self) -> Result<Vec<String>, ProviderError> {
        let agents = self.paths.agents_dir();
        match agents.as_std_path().try_exists() {
            Ok(true) => Ok(vec![LOCAL_INSTANCE_ID.to_owned()]),
            Ok(false) => Err(ProviderError::NotBootstrapped),
            Err(error) => Err(ProviderError::io("inspect", agents, error)),
        }
    }

    fn constraints_validator(&self) -> Result<ConstraintsValidator, ProviderError> {
        let mut validator = ConstraintsValidator::new();
        validator.register_unsupported(&UNSUPPORTED_CONSTRAINTS);
        validator.register_vocabulary(ConstraintKey::Arch, self.supported_architectures()?);
        Ok(validator)
    }

    fn supported_architectures(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec![host_arch().to_owned()])
    }

    fn supports_networks(&self) -> bool {
        false
    }

    fn tools_sources(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec![self.storage_dir().url(TOOLS_OBJECT)?])
    }

    fn storage(&self) -> Result<Box<dyn Storage>, ProviderError> {
        Ok(Box::new(self.storage_dir()))
    }

    fn destroy(&self) -> Result<DestroyOutcome, ProviderError> {
        self.destroyer().destroy(&self.config)
    }
}

/// Checks that the nearest existing ancestor of `root` is writable.
fn check_writable(root: &Utf8Path) -> Result<(), ProviderError> {
    let existing = root
        .ancestors()
        .find(|candidate| candidate.as_std_path().exists())
        .unwrap_or(root);
    access(existing.as_std_path(), AccessFlags::W_OK)
        .map_err(|errno| ProviderError::io("write to", existing, io::Error::from(errno)))
}
