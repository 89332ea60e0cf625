//! Provider storage for tools and environment artefacts.

use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use url::Url;

use crate::STORAGE_TARGET;
use crate::error::ProviderError;

/// Named blobs shared between the client and the environment's machines.
pub trait Storage: Send + Sync {
    /// Stores `data` under `name`, replacing any previous object.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is invalid or the write fails.
    fn put(&self, name: &str, data: &[u8]) -> Result<(), ProviderError>;

    /// Reads the object stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::StorageNotFound`] when nothing is stored.
    fn get(&self, name: &str) -> Result<Vec<u8>, ProviderError>;

    /// Names starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error when the storage cannot be listed.
    fn list(&self, prefix: &str) -> Result<Vec<String>, ProviderError>;

    /// Removes `name`; removing a missing object succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error when the object cannot be removed.
    fn remove(&self, name: &str) -> Result<(), ProviderError>;

    /// Removes every object.
    ///
    /// # Errors
    ///
    /// Returns an error when the storage cannot be cleared.
    fn remove_all(&self) -> Result<(), ProviderError>;

    /// URL machines use to fetch `name`.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is invalid.
    fn url(&self, name: &str) -> Result<String, ProviderError>;
}

/// [`Storage`] backed by a directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    dir: Utf8PathBuf,
}

impl DirectoryStorage {
    /// Serves objects from `dir`, which is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the objects.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn object_path(&self, name: &str) -> Result<Utf8PathBuf, ProviderError> {
        let path = Utf8Path::new(name);
        let valid = !name.is_empty()
            && path.is_relative()
            && path
                .components()
                .all(|component| matches!(component, camino::Utf8Component::Normal(_)));
        if !valid {
            return Err(ProviderError::InvalidStorageName {
                name: name.to_owned(),
            });
        }
        Ok(self.dir.join(path))
    }
}

impl Storage for DirectoryStorage {
    fn put(&self, name: &str, data: &[u8]) -> Result<(), ProviderError> {
        let path = self.object_path(name)?;
        let parent = path.parent().unwrap_or(&self.dir);
        fs::create_dir_all(parent)
            .map_err(|error| ProviderError::io("create directory", parent, error))?;
        let mut temp = NamedTempFile::new_in(parent)
            .map_err(|error| ProviderError::io("create temporary file", parent, error))?;
        temp.write_all(data)
            .map_err(|error| ProviderError::io("write", &path, error))?;
        temp.persist(&path)
            .map_err(|error| ProviderError::io("rename", &path, error.error))?;
        debug!(target: STORAGE_TARGET, name, bytes = data.len(), "object stored");
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, ProviderError> {
        let path = self.object_path(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(ProviderError::StorageNotFound {
                    name: name.to_owned(),
                })
            }
            Err(error) => Err(ProviderError::io("read", path, error)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, ProviderError> {
        let mut names = Vec::new();
        collect_names(&self.dir, &self.dir, &mut names)?;
        names.retain(|name| name.starts_with(prefix));
        names.sort();
        Ok(names)
    }

    fn remove(&self, name: &str) -> Result<(), ProviderError> {
        let path = self.object_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(ProviderError::io("remove", path, error)),
        }
    }

    fn remove_all(&self) -> Result<(), ProviderError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(ProviderError::io("remove", &self.dir, error)),
        }
    }

    fn url(&self, name: &str) -> Result<String, ProviderError> {
        let path = self.object_path(name)?;
        Url::from_file_path(&path)
            .map(String::from)
            .map_err(|()| ProviderError::StorageUrl { path })
    }
}

fn collect_names(
    root: &Utf8Path,
    dir: &Utf8Path,
    names: &mut Vec<String>,
) -> Result<(), ProviderError> {
    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(ProviderError::io("list", dir, error)),
    };
    for entry in entries {
        let entry = entry.map_err(|error| ProviderError::io("list", dir, error))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|error| ProviderError::io("inspect", path, error))?;
        if file_type.is_dir() {
            collect_names(root, path, names)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            names.push(relative.to_string());
        }
    }
    Ok(())
}
