use camino::Utf8PathBuf;
use std::env;

#[cfg(unix)]
use libc::geteuid;

#[cfg(unix)]
use dirs::home_dir;

use crate::logging::LogFormat;

/// Environment variable naming the corral home directory.
///
/// The privileged destroy re-invocation forwards this variable so the
/// escalated process resolves the same record store as the caller.
pub const HOME_ENV_VAR: &str = "CORRAL_HOME";

/// Environment name used when none is configured.
pub const DEFAULT_ENVIRONMENT_NAME: &str = "local";

/// Port the state database listens on.
pub const DEFAULT_STATE_PORT: u16 = 37017;

/// Port the control-plane API listens on.
pub const DEFAULT_API_PORT: u16 = 17070;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Seconds allowed for the transient database to accept connections.
pub const DEFAULT_DB_STARTUP_TIMEOUT_SECS: u64 = 30;

/// Location of the database server binary.
pub const DEFAULT_MONGOD_PATH: &str = "/usr/bin/mongod";

/// Location of the database shell binary.
pub const DEFAULT_MONGO_PATH: &str = "/usr/bin/mongo";

/// Directory receiving service unit files.
pub const DEFAULT_SERVICE_DIR: &str = "/etc/systemd/system";

pub(crate) fn default_environment_name() -> String {
    DEFAULT_ENVIRONMENT_NAME.to_owned()
}

pub(crate) const fn default_state_port() -> u16 {
    DEFAULT_STATE_PORT
}

pub(crate) const fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

pub(crate) const fn default_db_startup_timeout_secs() -> u64 {
    DEFAULT_DB_STARTUP_TIMEOUT_SECS
}

pub(crate) fn default_mongod_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_MONGOD_PATH)
}

pub(crate) fn default_mongo_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_MONGO_PATH)
}

pub(crate) fn default_service_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_SERVICE_DIR)
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the default corral home directory.
///
/// Resolution order: `$CORRAL_HOME`, `~/.corral`, then a per-user directory
/// under the system temporary directory.
pub fn default_home() -> Utf8PathBuf {
    if let Some(path) = env::var_os(HOME_ENV_VAR)
        .filter(|value| !value.is_empty())
        .and_then(|value| Utf8PathBuf::from_path_buf(value.into()).ok())
    {
        return path;
    }
    default_home_inner()
}

#[cfg(unix)]
fn default_home_inner() -> Utf8PathBuf {
    if let Some(mut base) = home_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok()) {
        base.push(".corral");
        return base;
    }
    let mut base = fallback_base_directory();
    base.push("corral");
    base.push(user_namespace());
    base
}

#[cfg(not(unix))]
fn default_home_inner() -> Utf8PathBuf {
    let mut base = fallback_base_directory();
    base.push("corral");
    base
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(unix)]
fn user_namespace() -> String {
    let uid = unsafe { geteuid() };
    format!("uid-{uid}")
}

/// Login name used to namespace services and containers.
///
/// `SUDO_USER` wins over `USER` so an escalated process derives the same
/// namespace as the user who invoked it.
pub fn current_user() -> String {
    ["SUDO_USER", "USER"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .find(|user| !user.is_empty())
        .unwrap_or_else(|| String::from("root"))
}
