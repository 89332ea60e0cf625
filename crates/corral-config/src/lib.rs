//! Shared configuration for the corral provisioning tools.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, an optional
//! TOML file (`--config-path`), `CORRAL_*` environment variables, and finally
//! command-line flags. The resolved [`Config`] also doubles as the bootstrap
//! configuration persisted alongside an environment's record, which is how a
//! privileged destroy re-invocation recovers the layout of an environment
//! from its name alone.

mod defaults;
mod logging;
mod paths;
mod provider;

use std::collections::BTreeMap;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_API_PORT, DEFAULT_DB_STARTUP_TIMEOUT_SECS, DEFAULT_ENVIRONMENT_NAME,
    DEFAULT_LOG_FILTER, DEFAULT_MONGO_PATH, DEFAULT_MONGOD_PATH, DEFAULT_SERVICE_DIR,
    DEFAULT_STATE_PORT, HOME_ENV_VAR, current_user, default_home, default_log_filter_string,
    default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError, LogSettings};
pub use paths::EnvironPaths;
pub use provider::{ProviderKind, ProviderKindParseError};

/// Opaque attribute map persisted as an environment's bootstrap configuration.
pub type BootstrapAttrs = BTreeMap<String, serde_json::Value>;

/// Environment configuration shared by the CLI and the provider backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "CORRAL")]
pub struct Config {
    /// Environment name; keys the record store.
    #[serde(default = "defaults::default_environment_name")]
    pub name: String,
    /// Infrastructure backend.
    #[serde(default)]
    pub provider: ProviderKind,
    /// Directory holding the record store (`$CORRAL_HOME`).
    #[serde(default = "defaults::default_home")]
    pub home: Utf8PathBuf,
    /// Root of the local environment tree; defaults to `<home>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<Utf8PathBuf>,
    /// Prefix for services and containers; defaults to `<user>-<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// System log directory linked from the root; defaults to
    /// `/var/log/corral-<namespace>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<Utf8PathBuf>,
    /// State database port.
    #[serde(default = "defaults::default_state_port")]
    pub state_port: u16,
    /// Control-plane API port.
    #[serde(default = "defaults::default_api_port")]
    pub api_port: u16,
    /// Password for the administrative principal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_secret: Option<String>,
    /// Refresh the package index while provisioning the state server.
    #[serde(default)]
    pub enable_os_refresh_update: bool,
    /// Upgrade installed packages while provisioning the state server.
    #[serde(default)]
    pub enable_os_upgrade: bool,
    /// Database server binary.
    #[serde(default = "defaults::default_mongod_path")]
    pub mongod_path: Utf8PathBuf,
    /// Database shell binary.
    #[serde(default = "defaults::default_mongo_path")]
    pub mongo_path: Utf8PathBuf,
    /// Deadline for the transient database to accept connections.
    #[serde(default = "defaults::default_db_startup_timeout_secs")]
    pub db_startup_timeout_secs: u64,
    /// Directory receiving service unit files.
    #[serde(default = "defaults::default_service_dir")]
    pub service_dir: Utf8PathBuf,
    /// `tracing` filter directive.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: defaults::default_environment_name(),
            provider: ProviderKind::default(),
            home: default_home(),
            root_dir: None,
            namespace: None,
            log_dir: None,
            state_port: DEFAULT_STATE_PORT,
            api_port: DEFAULT_API_PORT,
            admin_secret: None,
            enable_os_refresh_update: false,
            enable_os_upgrade: false,
            mongod_path: defaults::default_mongod_path(),
            mongo_path: defaults::default_mongo_path(),
            db_startup_timeout_secs: DEFAULT_DB_STARTUP_TIMEOUT_SECS,
            service_dir: defaults::default_service_dir(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Root of the local environment tree.
    #[must_use]
    pub fn root_dir(&self) -> Utf8PathBuf {
        self.root_dir
            .clone()
            .unwrap_or_else(|| self.home.join(&self.name))
    }

    /// Namespace applied to services and containers.
    #[must_use]
    pub fn namespace(&self) -> String {
        self.namespace
            .clone()
            .unwrap_or_else(|| format!("{}-{}", current_user(), self.name))
    }

    /// System log directory for the local provider.
    #[must_use]
    pub fn log_dir(&self) -> Utf8PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(format!("/var/log/corral-{}", self.namespace())))
    }

    /// Deadline for the transient database startup wait.
    #[must_use]
    pub const fn db_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.db_startup_timeout_secs)
    }

    /// Logging settings derived from this configuration.
    #[must_use]
    pub fn log_settings(&self) -> LogSettings {
        LogSettings::new(&self.log_filter, self.log_format)
    }

    /// Returns a copy with every derived default written out explicitly.
    ///
    /// Persisting the resolved form keeps the layout stable when the record
    /// is later read by a process with a different user or home directory.
    #[must_use]
    pub fn resolved(&self) -> Self {
        Self {
            root_dir: Some(self.root_dir()),
            namespace: Some(self.namespace()),
            log_dir: Some(self.log_dir()),
            ..self.clone()
        }
    }

    /// Checks the values that every provider relies upon.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.name)?;
        if let Some(namespace) = &self.namespace {
            validate_name(namespace).map_err(|error| match error {
                ConfigError::InvalidName { reason, .. } => ConfigError::InvalidNamespace {
                    namespace: namespace.clone(),
                    reason,
                },
                other => other,
            })?;
        }
        if self.state_port == 0 {
            return Err(ConfigError::ZeroPort { key: "state_port" });
        }
        if self.api_port == 0 {
            return Err(ConfigError::ZeroPort { key: "api_port" });
        }
        if self.state_port == self.api_port {
            return Err(ConfigError::PortConflict {
                port: self.state_port,
            });
        }
        if self.db_startup_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Serialises the configuration into bootstrap attributes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialise`] when the configuration cannot be
    /// represented as a JSON object.
    pub fn to_bootstrap_attrs(&self) -> Result<BootstrapAttrs, ConfigError> {
        match serde_json::to_value(self).map_err(ConfigError::Serialise)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(ConfigError::NotAnObject),
        }
    }

    /// Rebuilds a configuration from persisted bootstrap attributes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialise`] when the attributes do not describe
    /// a valid configuration.
    pub fn from_bootstrap_attrs(attrs: &BootstrapAttrs) -> Result<Self, ConfigError> {
        let object: serde_json::Map<String, serde_json::Value> = attrs
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object)).map_err(ConfigError::Serialise)
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.starts_with('-') {
        Some("must not start with '-'")
    } else if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        Some("may only contain ASCII letters, digits, '-' and '_'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::InvalidName {
            name: name.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Errors raised while validating or converting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The environment name is unusable as a record key.
    #[error("invalid environment name '{name}': {reason}")]
    InvalidName {
        /// Rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// The namespace is unusable as a service prefix.
    #[error("invalid namespace '{namespace}': {reason}")]
    InvalidNamespace {
        /// Rejected namespace.
        namespace: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// A port was configured as zero.
    #[error("{key} must be non-zero")]
    ZeroPort {
        /// Offending key.
        key: &'static str,
    },
    /// The state and API ports collide.
    #[error("state_port and api_port must differ (both {port})")]
    PortConflict {
        /// Shared port number.
        port: u16,
    },
    /// The startup deadline was configured as zero.
    #[error("db_startup_timeout_secs must be non-zero")]
    ZeroTimeout,
    /// Converting between configuration and attributes failed.
    #[error("failed to convert bootstrap configuration: {0}")]
    Serialise(#[source] serde_json::Error),
    /// The configuration did not serialise to an object.
    #[error("bootstrap configuration must serialise to a map")]
    NotAnObject,
}
