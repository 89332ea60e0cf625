//! Database sessions.

use std::time::Duration;

use crate::error::SessionError;

/// Roles granted to the administrative principal.
pub const ADMIN_ROLES: [&str; 4] = [
    "readWriteAnyDatabase",
    "dbAdminAnyDatabase",
    "userAdminAnyDatabase",
    "clusterAdmin",
];

/// Name of the database holding user credentials.
pub const ADMIN_DATABASE: &str = "admin";

/// How to reach a database server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialInfo {
    /// `host:port` addresses, tried in order.
    pub addresses: Vec<String>,
    /// Per-attempt connection timeout.
    pub timeout: Duration,
    /// Whether to connect over TLS.
    pub tls: bool,
}

impl DialInfo {
    /// Dial info for a single TLS endpoint.
    #[must_use]
    pub fn tls(address: impl Into<String>) -> Self {
        Self {
            addresses: vec![address.into()],
            timeout: Duration::from_secs(5),
            tls: true,
        }
    }

    /// First address, used in diagnostics.
    #[must_use]
    pub fn primary_address(&self) -> &str {
        self.addresses.first().map_or("", String::as_str)
    }
}

/// Credential management on an open session.
pub trait AdminSession: Send {
    /// Number of users defined in the admin database.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the query fails.
    fn user_count(&mut self) -> Result<usize, SessionError>;

    /// Creates the user or replaces its password and roles.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unauthorized`] when the server requires
    /// authentication, or another [`SessionError`] when the upsert fails.
    fn upsert_user(
        &mut self,
        database: &str,
        user: &str,
        password: &str,
        roles: &[&str],
    ) -> Result<(), SessionError>;
}

/// Opens sessions.
pub trait SessionDialer: Send + Sync {
    /// Connects to the server described by `info`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unreachable`] while the server is not yet
    /// accepting connections.
    fn dial(&self, info: &DialInfo) -> Result<Box<dyn AdminSession>, SessionError>;
}

/// Writes to the environment's control records.
pub trait StateSession {
    /// Creates the environment control record.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the record cannot be written.
    fn initialize_environment(
        &mut self,
        env_type: &str,
        state_servers: &[String],
    ) -> Result<(), SessionError>;

    /// Adds a machine that manages the environment, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the machine cannot be added.
    fn add_machine(&mut self, jobs: &[&str]) -> Result<String, SessionError>;

    /// Records the provider instance backing a machine.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the machine cannot be updated.
    fn set_instance_id(&mut self, machine: &str, instance_id: &str) -> Result<(), SessionError>;
}
