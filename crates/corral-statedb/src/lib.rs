//! State database bootstrap for corral environments.
//!
//! The permanent database service always runs with authentication enabled.
//! [`AdminBootstrapper`] performs the one legitimate transition out of the
//! unauthenticated state: it briefly runs a `--noauth` server on the same data
//! directory, inserts the administrative user when none exists, and restores
//! the permanent service. Process, service and session control are injected
//! through [`ProcessLauncher`], [`ServiceController`] and [`SessionDialer`];
//! the production adapters drive `mongod`, `systemctl` and the `mongo` shell.
//!
//! [`seed_state`] writes the initial control records once the database is
//! reachable.

mod admin;
mod error;
mod process;
mod seed;
mod service;
mod session;
mod shell;
mod systemd;

#[cfg(test)]
mod tests;

pub use self::admin::{
    AdminBootstrapParams, AdminBootstrapper, STARTUP_TIMEOUT, database_service,
    database_service_name, set_admin_password, transient_args,
};
pub use self::error::{SessionError, StateDbError};
pub use self::process::{
    ChildProcess, EXIT_TIMEOUT, MongodLauncher, ProcessLauncher, TransientProcess,
    terminate_and_wait,
};
pub use self::seed::{MANAGE_ENVIRON_JOB, StateSeed, seed_state};
pub use self::service::{ServiceController, ServiceDefinition};
pub use self::session::{
    ADMIN_DATABASE, ADMIN_ROLES, AdminSession, DialInfo, SessionDialer, StateSession,
};
pub use self::shell::{MongoShell, MongoShellDialer, STATE_DATABASE, ShellSession};
pub use self::systemd::{SystemdController, render_unit};

pub(crate) const ADMIN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::admin");
pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");
pub(crate) const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");
pub(crate) const SEED_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::seed");
