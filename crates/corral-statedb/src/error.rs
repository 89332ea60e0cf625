//! Errors raised while driving the state database.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failures reported by an open database session.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The server refused the operation for lack of privileges.
    #[error("{message}")]
    Unauthorized {
        /// Server diagnostic, beginning with `not authorized`.
        message: String,
    },
    /// The server could not be reached; callers may retry.
    #[error("cannot connect to {address}: {message}")]
    Unreachable {
        /// Address that was dialled.
        address: String,
        /// Connection diagnostic.
        message: String,
    },
    /// The server rejected or failed the command.
    #[error("{message}")]
    Command {
        /// Server diagnostic.
        message: String,
    },
    /// The client tool could not be run.
    #[error("failed to run '{program}': {source}")]
    Client {
        /// Client executable.
        program: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The client output could not be interpreted.
    #[error("unexpected client output: {output}")]
    Output {
        /// Raw output that failed to parse.
        output: String,
    },
}

impl SessionError {
    /// Whether the failure means the server is not accepting connections yet.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }

    /// Whether the server refused the operation for lack of privileges.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Errors surfaced by the admin bootstrap protocol and its adapters.
#[derive(Debug, Error)]
pub enum StateDbError {
    /// Inserting the admin user was refused because authentication is on.
    #[error("failed to add \"{user}\" to admin database: cannot set admin password: {message}")]
    Unauthorized {
        /// User that could not be added.
        user: String,
        /// Server diagnostic, beginning with `not authorized`.
        message: String,
    },
    /// Inserting the admin user failed for another reason.
    #[error("failed to add \"{user}\" to admin database: {source}")]
    AddAdmin {
        /// User that could not be added.
        user: String,
        /// Underlying failure.
        #[source]
        source: Box<Self>,
    },
    /// The password upsert failed.
    #[error("cannot set admin password: {source}")]
    SetPassword {
        /// Session failure.
        #[source]
        source: SessionError,
    },
    /// A session operation failed.
    #[error("state database {operation} failed: {source}")]
    Session {
        /// Step that failed.
        operation: &'static str,
        /// Session failure.
        #[source]
        source: SessionError,
    },
    /// The transient server did not accept connections before the deadline.
    #[error("state database at {address} did not accept connections within {timeout:?}")]
    StartupTimeout {
        /// Address that was polled.
        address: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The transient server exited before accepting connections.
    #[error("transient state database exited before accepting connections ({status})")]
    EarlyExit {
        /// Rendered exit status.
        status: String,
    },
    /// The transient server did not exit after being signalled.
    #[error("transient state database (pid {pid}) did not exit within {timeout:?}")]
    ExitTimeout {
        /// Process identifier.
        pid: u32,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Launching a process failed.
    #[error("failed to launch '{program}': {source}")]
    Launch {
        /// Executable that failed to start.
        program: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Polling a child process failed.
    #[error("failed to monitor process {pid}: {source}")]
    Monitor {
        /// Process identifier.
        pid: u32,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Signalling a process failed.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// Process identifier.
        pid: u32,
        /// Underlying errno.
        #[source]
        source: nix::errno::Errno,
    },
    /// A service manager operation failed.
    #[error("failed to {operation} service '{service}': {message}")]
    Service {
        /// Step that failed.
        operation: &'static str,
        /// Service name.
        service: String,
        /// Diagnostic from the service manager.
        message: String,
    },
    /// A filesystem operation on service definitions failed.
    #[error("failed to {operation} '{path}': {source}")]
    Io {
        /// Step that failed.
        operation: &'static str,
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// A required initial-state value was missing.
    #[error("--{flag} option must be set")]
    MissingFlag {
        /// Flag name without leading dashes.
        flag: &'static str,
    },
}

impl StateDbError {
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
}
