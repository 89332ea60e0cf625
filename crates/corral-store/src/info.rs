//! The environment record handle.
//!
//! A handle carries the in-memory view of one record. Setters only touch
//! memory; [`EnvironInfo::write`] persists the whole record atomically by
//! writing a sibling temporary file and renaming it over the artefact, so a
//! crash mid-write leaves either the previous contents or the new ones.

use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use corral_config::BootstrapAttrs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::STORE_TARGET;
use crate::error::StoreError;

/// Credentials for the administrative API user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiCredentials {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

/// How to reach and trust the state servers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiEndpoint {
    /// Ordered `host:port` addresses.
    pub addresses: Vec<String>,
    /// PEM-encoded CA certificate.
    pub ca_cert: String,
}

/// On-disk layout of a record.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RecordFile {
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    state_servers: Vec<String>,
    #[serde(default)]
    ca_cert: String,
    #[serde(default, skip_serializing_if = "BootstrapAttrs::is_empty")]
    bootstrap_config: BootstrapAttrs,
}

/// Handle for a single environment record.
#[derive(Debug, Clone)]
pub struct EnvironInfo {
    name: String,
    path: Utf8PathBuf,
    initialized: bool,
    created: bool,
    credentials: ApiCredentials,
    endpoint: ApiEndpoint,
    bootstrap_config: BootstrapAttrs,
}

impl EnvironInfo {
    pub(crate) fn reserved(name: &str, path: Utf8PathBuf) -> Self {
        Self {
            name: name.to_owned(),
            path,
            initialized: false,
            created: true,
            credentials: ApiCredentials::default(),
            endpoint: ApiEndpoint::default(),
            bootstrap_config: BootstrapAttrs::new(),
        }
    }

    pub(crate) fn load(name: &str, path: Utf8PathBuf) -> Result<Self, StoreError> {
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    name: name.to_owned(),
                });
            }
            Err(error) => return Err(StoreError::io("read", path, error)),
        };
        if contents.trim().is_empty() {
            debug!(target: STORE_TARGET, name, "record reserved but not initialised");
            return Ok(Self {
                created: false,
                ..Self::reserved(name, path)
            });
        }
        let record: RecordFile =
            serde_saphyr::from_str(&contents).map_err(|error| StoreError::Parse {
                path: path.clone(),
                message: error.to_string(),
            })?;
        Ok(Self {
            name: name.to_owned(),
            path,
            initialized: true,
            created: false,
            credentials: ApiCredentials {
                user: record.user,
                password: record.password,
            },
            endpoint: ApiEndpoint {
                addresses: record.state_servers,
                ca_cert: record.ca_cert,
            },
            bootstrap_config: record.bootstrap_config,
        })
    }

    /// Environment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location of the record artefact.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Whether the record has been durably written.
    #[must_use]
    pub const fn initialized(&self) -> bool {
        self.initialized
    }

    /// Whether this handle reserved the record.
    #[must_use]
    pub const fn created(&self) -> bool {
        self.created
    }

    /// API credentials.
    #[must_use]
    pub const fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }

    /// API endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &ApiEndpoint {
        &self.endpoint
    }

    /// Configuration captured at bootstrap.
    #[must_use]
    pub const fn bootstrap_config(&self) -> &BootstrapAttrs {
        &self.bootstrap_config
    }

    /// Replaces the in-memory credentials.
    pub fn set_credentials(&mut self, credentials: ApiCredentials) {
        self.credentials = credentials;
    }

    /// Replaces the in-memory endpoint.
    pub fn set_endpoint(&mut self, endpoint: ApiEndpoint) {
        self.endpoint = endpoint;
    }

    /// Records the bootstrap configuration for a freshly reserved record.
    ///
    /// # Panics
    ///
    /// Panics when the handle was obtained by reading an existing record:
    /// bootstrap configuration is fixed once the environment exists.
    pub fn set_bootstrap_config(&mut self, attrs: BootstrapAttrs) {
        assert!(
            self.created,
            "bootstrap config set on environment info that has not just been created"
        );
        self.bootstrap_config = attrs;
    }

    /// Persists the record atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the record cannot be serialised or the
    /// temporary file cannot be written, synced or renamed into place.
    pub fn write(&mut self) -> Result<(), StoreError> {
        let record = RecordFile {
            user: self.credentials.user.clone(),
            password: self.credentials.password.clone(),
            state_servers: self.endpoint.addresses.clone(),
            ca_cert: self.endpoint.ca_cert.clone(),
            bootstrap_config: self.bootstrap_config.clone(),
        };
        let yaml = serde_saphyr::to_string(&record).map_err(|error| StoreError::Serialise {
            name: self.name.clone(),
            message: error.to_string(),
        })?;
        let parent = self
            .path
            .parent()
            .map_or_else(|| Utf8PathBuf::from("."), Utf8Path::to_path_buf);
        let mut temp = NamedTempFile::new_in(&parent)
            .map_err(|error| StoreError::io("create temporary file in", &parent, error))?;
        temp.write_all(yaml.as_bytes())
            .map_err(|error| StoreError::io("write temporary file for", &self.path, error))?;
        temp.as_file()
            .sync_all()
            .map_err(|error| StoreError::io("sync temporary file for", &self.path, error))?;
        temp.persist(&self.path).map_err(|error| {
            StoreError::io("rename temporary file over", &self.path, error.error)
        })?;
        self.initialized = true;
        info!(
            target: STORE_TARGET,
            name = %self.name,
            file = %self.path,
            "environment info written"
        );
        Ok(())
    }

    /// Removes the record artefact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyRemoved`] when the artefact no longer
    /// exists, or [`StoreError::Io`] for any other removal failure.
    pub fn destroy(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(
                    target: STORE_TARGET,
                    name = %self.name,
                    file = %self.path,
                    "environment info removed"
                );
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::AlreadyRemoved {
                    name: self.name.clone(),
                })
            }
            Err(error) => Err(StoreError::io("remove", &self.path, error)),
        }
    }
}
