//! Errors raised by the environment record store.
//!
//! I/O errors are wrapped in `Arc` so the enum stays small enough for the
//! `result_large_err` lint while remaining cloneable by reference.

use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors arising from environment record operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record name cannot be used as a file name.
    #[error("invalid environment name '{name}': {reason}")]
    InvalidName {
        /// Rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A record with this name is already reserved or written.
    #[error("environment '{name}' already exists")]
    AlreadyExists {
        /// Environment name.
        name: String,
    },

    /// No record exists for this name.
    #[error("environment '{name}' not found")]
    NotFound {
        /// Environment name.
        name: String,
    },

    /// The record was destroyed earlier.
    #[error("environment info for '{name}' has already been removed")]
    AlreadyRemoved {
        /// Environment name.
        name: String,
    },

    /// The store root does not exist or is not a directory.
    #[error("store directory '{path}' does not exist")]
    MissingDirectory {
        /// Configured root.
        path: Utf8PathBuf,
    },

    /// A filesystem operation failed.
    #[error("failed to {operation} '{path}': {source}")]
    Io {
        /// Step that failed, phrased as a verb.
        operation: &'static str,
        /// Path involved in the failure.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A record file could not be parsed.
    #[error("error reading '{path}': {message}")]
    Parse {
        /// Record file that failed to parse.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// A record could not be rendered as YAML.
    #[error("cannot serialise environment info for '{name}': {message}")]
    Serialise {
        /// Environment name.
        name: String,
        /// Serialiser diagnostic.
        message: String,
    },
}

impl StoreError {
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
