//! Derives the on-disk layout of a local environment.
//!
//! The root directory houses the agents tree, the state database files, the
//! provider storage area and the log link. Bootstrap, destroy and the
//! state-server query all need to agree on this layout, so every consumer
//! derives it from the same [`Config`].

use camino::{Utf8Path, Utf8PathBuf};

use crate::Config;

const AGENTS_DIR: &str = "agents";
const DB_DIR: &str = "db";
const LOG_LINK: &str = "log";
const STORAGE_DIR: &str = "storage";
const CLOUD_INIT_OUTPUT_LOG: &str = "cloud-init-output.log";
const CA_CERT: &str = "ca-cert.pem";
const CA_KEY: &str = "ca-private-key.pem";
const BOOTSTRAP_MACHINE: &str = "machine-0";

/// Canonical paths for one environment's local artefacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironPaths {
    root_dir: Utf8PathBuf,
    agents_dir: Utf8PathBuf,
    db_dir: Utf8PathBuf,
    log_link: Utf8PathBuf,
    storage_dir: Utf8PathBuf,
    cloud_init_output_log: Utf8PathBuf,
    system_log_dir: Utf8PathBuf,
}

impl EnvironPaths {
    /// Derives paths from the configuration without touching the filesystem.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let root_dir = config.root_dir();
        Self {
            agents_dir: root_dir.join(AGENTS_DIR),
            db_dir: root_dir.join(DB_DIR),
            log_link: root_dir.join(LOG_LINK),
            storage_dir: root_dir.join(STORAGE_DIR),
            cloud_init_output_log: root_dir.join(CLOUD_INIT_OUTPUT_LOG),
            system_log_dir: config.log_dir(),
            root_dir,
        }
    }

    /// Root of the environment tree.
    #[must_use]
    pub fn root_dir(&self) -> &Utf8Path {
        &self.root_dir
    }

    /// Directory whose presence marks a bootstrapped environment.
    #[must_use]
    pub fn agents_dir(&self) -> &Utf8Path {
        &self.agents_dir
    }

    /// State database data directory.
    #[must_use]
    pub fn db_dir(&self) -> &Utf8Path {
        &self.db_dir
    }

    /// Symlink pointing at the system log directory.
    #[must_use]
    pub fn log_link(&self) -> &Utf8Path {
        &self.log_link
    }

    /// Provider storage area.
    #[must_use]
    pub fn storage_dir(&self) -> &Utf8Path {
        &self.storage_dir
    }

    /// Output captured from a previous provisioning run.
    #[must_use]
    pub fn cloud_init_output_log(&self) -> &Utf8Path {
        &self.cloud_init_output_log
    }

    /// System directory the log link resolves to.
    #[must_use]
    pub fn system_log_dir(&self) -> &Utf8Path {
        &self.system_log_dir
    }

    /// Server certificate and key consumed by the state database.
    #[must_use]
    pub fn server_pem(&self) -> Utf8PathBuf {
        self.db_dir.join("server.pem")
    }

    /// CA certificate generated when the environment is prepared.
    #[must_use]
    pub fn ca_cert(&self) -> Utf8PathBuf {
        self.root_dir.join(CA_CERT)
    }

    /// CA private key; readable by the owner only.
    #[must_use]
    pub fn ca_key(&self) -> Utf8PathBuf {
        self.root_dir.join(CA_KEY)
    }

    /// Agent directory of the bootstrap machine.
    #[must_use]
    pub fn bootstrap_agent_dir(&self) -> Utf8PathBuf {
        self.agents_dir.join(BOOTSTRAP_MACHINE)
    }
}
