//! Directory-backed record store.

use std::fs::{self, OpenOptions};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use corral_config::Config;
use tracing::info;

use crate::STORE_TARGET;
use crate::error::StoreError;
use crate::info::EnvironInfo;

const ENVIRONMENTS_DIR: &str = "environments";
const RECORD_EXTENSION: &str = "yaml";

/// Reservation and lookup of environment records.
pub trait EnvironInfoStore {
    /// Exclusively reserves a record, returning a handle flagged as created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the name is taken.
    fn create_info(&self, name: &str) -> Result<EnvironInfo, StoreError>;

    /// Reads an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no record exists.
    fn read_info(&self, name: &str) -> Result<EnvironInfo, StoreError>;
}

/// Stores one YAML file per environment under `<dir>/environments`.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: Utf8PathBuf,
}

impl DiskStore {
    /// Opens a store rooted at an existing directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingDirectory`] when `dir` is not an existing
    /// directory.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        match fs::metadata(&dir) {
            Ok(metadata) if metadata.is_dir() => Ok(Self { dir }),
            Ok(_) => Err(StoreError::MissingDirectory { path: dir }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::MissingDirectory { path: dir })
            }
            Err(error) => Err(StoreError::io("inspect", dir, error)),
        }
    }

    /// Opens the store rooted at the configured home directory, creating the
    /// home directory when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the home directory cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        create_private_dir(&config.home)?;
        Self::new(config.home.clone())
    }

    /// Root directory of the store.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Directory holding the record files.
    #[must_use]
    pub fn environments_dir(&self) -> Utf8PathBuf {
        self.dir.join(ENVIRONMENTS_DIR)
    }

    /// Path of the record for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] when `name` cannot be used as a
    /// file name.
    pub fn record_path(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self
            .environments_dir()
            .join(format!("{name}.{RECORD_EXTENSION}")))
    }
}

impl EnvironInfoStore for DiskStore {
    fn create_info(&self, name: &str) -> Result<EnvironInfo, StoreError> {
        let path = self.record_path(name)?;
        create_private_dir(&self.environments_dir())?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        match options.open(&path) {
            Ok(_) => {
                info!(
                    target: STORE_TARGET,
                    name,
                    file = %path,
                    "environment info reserved"
                );
                Ok(EnvironInfo::reserved(name, path))
            }
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists {
                    name: name.to_owned(),
                })
            }
            Err(error) => Err(StoreError::io("create", path, error)),
        }
    }

    fn read_info(&self, name: &str) -> Result<EnvironInfo, StoreError> {
        let path = self.record_path(name)?;
        EnvironInfo::load(name, path)
    }
}

fn create_private_dir(path: &Utf8Path) -> Result<(), StoreError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(path)
        .map_err(|error| StoreError::io("create directory", path, error))
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name == "." || name == ".." {
        Some("must not be a relative directory reference")
    } else if name.contains(['/', '\\', '\0']) {
        Some("must not contain path separators")
    } else {
        None
    };
    reason.map_or(Ok(()), |reason| {
        Err(StoreError::InvalidName {
            name: name.to_owned(),
            reason,
        })
    })
}
