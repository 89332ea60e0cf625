//! Injects the first administrative credential into the state database.
//!
//! The permanent service runs with authentication enabled, which means no
//! user can be created until one exists. The bootstrap therefore stops the
//! service, runs a transient server on the same data directory with
//! `--noauth`, upserts the admin user, terminates the transient server and
//! brings the permanent service back. A second run finds the user and leaves
//! it alone, so retrying after a crash never duplicates the credential.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::ADMIN_TARGET;
use crate::error::{SessionError, StateDbError};
use crate::process::{
    EXIT_TIMEOUT, POLL_INTERVAL, ProcessLauncher, TransientProcess, terminate_and_wait,
};
use crate::service::{ServiceController, ServiceDefinition};
use crate::session::{ADMIN_DATABASE, ADMIN_ROLES, AdminSession, DialInfo, SessionDialer};

/// Default deadline for the transient server to accept connections.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const LOOPBACK: &str = "127.0.0.1";
const ANY_ADDRESS: &str = "0.0.0.0";
const PEM_FILE: &str = "server.pem";

/// Everything one admin bootstrap run needs.
#[derive(Debug, Clone)]
pub struct AdminBootstrapParams {
    /// Database server binary.
    pub mongod_path: Utf8PathBuf,
    /// Data directory shared by the transient and permanent servers.
    pub db_dir: Utf8PathBuf,
    /// Address the transient server binds to.
    pub bind_address: String,
    /// Port the transient server listens on.
    pub port: u16,
    /// Admin user name.
    pub user: String,
    /// Admin password.
    pub password: String,
    /// Permanent service restored after the bootstrap.
    pub service: ServiceDefinition,
    /// Deadline for the transient server to accept connections.
    pub startup_timeout: Duration,
    /// Deadline for the transient server to exit after `SIGTERM`.
    pub exit_timeout: Duration,
}

impl AdminBootstrapParams {
    /// Builds parameters for the permanent service of `namespace`, binding
    /// the transient server to loopback with the default deadlines.
    #[must_use]
    pub fn new(
        namespace: &str,
        mongod_path: &Utf8Path,
        db_dir: &Utf8Path,
        port: u16,
        user: &str,
        password: &str,
    ) -> Self {
        Self {
            mongod_path: mongod_path.to_path_buf(),
            db_dir: db_dir.to_path_buf(),
            bind_address: LOOPBACK.to_owned(),
            port,
            user: user.to_owned(),
            password: password.to_owned(),
            service: database_service(namespace, mongod_path, db_dir, port),
            startup_timeout: STARTUP_TIMEOUT,
            exit_timeout: EXIT_TIMEOUT,
        }
    }

    /// Address used to dial the transient server.
    #[must_use]
    pub fn dial_address(&self) -> String {
        let host = if self.bind_address == ANY_ADDRESS {
            LOOPBACK
        } else {
            self.bind_address.as_str()
        };
        format!("{host}:{}", self.port)
    }
}

/// Name of the database service for `namespace`.
#[must_use]
pub fn database_service_name(namespace: &str) -> String {
    format!("corral-db-{namespace}")
}

/// Arguments for the unauthenticated transient server.
#[must_use]
pub fn transient_args(db_dir: &Utf8Path, bind_address: &str, port: u16) -> Vec<String> {
    let mut args = vec!["--noauth".to_owned()];
    args.extend(common_args(db_dir, bind_address, port));
    args
}

/// The permanent, authenticated database service.
#[must_use]
pub fn database_service(
    namespace: &str,
    mongod_path: &Utf8Path,
    db_dir: &Utf8Path,
    port: u16,
) -> ServiceDefinition {
    let mut command = vec![mongod_path.to_string(), "--auth".to_owned()];
    command.extend(common_args(db_dir, ANY_ADDRESS, port));
    ServiceDefinition {
        name: database_service_name(namespace),
        description: format!("corral state database ({namespace})"),
        command,
    }
}

fn common_args(db_dir: &Utf8Path, bind_address: &str, port: u16) -> Vec<String> {
    [
        "--dbpath",
        db_dir.as_str(),
        "--sslOnNormalPorts",
        "--sslPEMKeyFile",
        db_dir.join(PEM_FILE).as_str(),
        "--sslPEMKeyPassword",
        "ignored",
        "--bind_ip",
        bind_address,
        "--port",
        &port.to_string(),
        "--noprealloc",
        "--syslog",
        "--smallfiles",
        "--journal",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Sets `user`'s password in the admin database with the admin roles.
///
/// # Errors
///
/// Returns [`StateDbError::SetPassword`] wrapping the session failure.
pub fn set_admin_password(
    session: &mut dyn AdminSession,
    user: &str,
    password: &str,
) -> Result<(), StateDbError> {
    session
        .upsert_user(ADMIN_DATABASE, user, password, &ADMIN_ROLES)
        .map_err(|source| StateDbError::SetPassword { source })
}

/// Runs the admin bootstrap protocol against injected collaborators.
pub struct AdminBootstrapper {
    services: Arc<dyn ServiceController>,
    launcher: Arc<dyn ProcessLauncher>,
    dialer: Arc<dyn SessionDialer>,
}

impl AdminBootstrapper {
    /// Creates a bootstrapper.
    #[must_use]
    pub fn new(
        services: Arc<dyn ServiceController>,
        launcher: Arc<dyn ProcessLauncher>,
        dialer: Arc<dyn SessionDialer>,
    ) -> Self {
        Self {
            services,
            launcher,
            dialer,
        }
    }

    /// Ensures the admin user exists, returning whether it was added.
    ///
    /// Every call stops the permanent service (when installed), runs the
    /// transient server, and reinstalls and starts the permanent service.
    /// Failures while the transient server runs leave the permanent service
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns [`StateDbError::Unauthorized`] when the server refused the
    /// insert, or the error from whichever step failed.
    pub fn ensure_admin_user(&self, params: &AdminBootstrapParams) -> Result<bool, StateDbError> {
        let service = params.service.name.as_str();
        if self.services.installed(service)? {
            self.services.stop(service)?;
            debug!(target: ADMIN_TARGET, service, "stopped permanent database service");
        }

        let args = transient_args(&params.db_dir, &params.bind_address, params.port);
        let mut process = self.launcher.launch(&params.mongod_path, &args)?;
        let outcome = self.add_admin(process.as_mut(), params);
        let stopped = terminate_and_wait(process.as_mut(), params.exit_timeout);
        let added = match (outcome, stopped) {
            (Ok(added), Ok(_)) => added,
            (Err(error), stopped) => {
                if let Err(stop_error) = stopped {
                    warn!(
                        target: ADMIN_TARGET,
                        error = %stop_error,
                        "transient database did not stop cleanly"
                    );
                }
                return Err(error);
            }
            (Ok(_), Err(error)) => return Err(error),
        };

        self.services.install(&params.service)?;
        self.services.start(service)?;
        info!(
            target: ADMIN_TARGET,
            service,
            user = %params.user,
            added,
            "admin bootstrap complete"
        );
        Ok(added)
    }

    fn add_admin(
        &self,
        process: &mut dyn TransientProcess,
        params: &AdminBootstrapParams,
    ) -> Result<bool, StateDbError> {
        let info = DialInfo::tls(params.dial_address());
        let mut session = self.wait_for_ready(process, &info, params.startup_timeout)?;
        let users = session
            .user_count()
            .map_err(|source| StateDbError::Session {
                operation: "user count",
                source,
            })?;
        if users > 0 {
            debug!(target: ADMIN_TARGET, users, "admin database already has users");
            return Ok(false);
        }
        set_admin_password(session.as_mut(), &params.user, &params.password).map_err(
            |error| match error {
                StateDbError::SetPassword {
                    source: SessionError::Unauthorized { message },
                } => StateDbError::Unauthorized {
                    user: params.user.clone(),
                    message,
                },
                other => StateDbError::AddAdmin {
                    user: params.user.clone(),
                    source: Box::new(other),
                },
            },
        )?;
        info!(target: ADMIN_TARGET, user = %params.user, "admin user added");
        Ok(true)
    }

    fn wait_for_ready(
        &self,
        process: &mut dyn TransientProcess,
        info: &DialInfo,
        timeout: Duration,
    ) -> Result<Box<dyn AdminSession>, StateDbError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = process.try_wait()? {
                return Err(StateDbError::EarlyExit { status });
            }
            match self.dialer.dial(info) {
                Ok(session) => return Ok(session),
                Err(error) if error.is_unreachable() => {
                    debug!(target: ADMIN_TARGET, error = %error, "state database not ready");
                }
                Err(source) => {
                    return Err(StateDbError::Session {
                        operation: "dial",
                        source,
                    });
                }
            }
            if Instant::now() >= deadline {
                return Err(StateDbError::StartupTimeout {
                    address: info.primary_address().to_owned(),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
