//! Durable storage for environment records.
//!
//! Each environment owns one YAML file under `<home>/environments/`. Creating
//! a record exclusively reserves an empty placeholder, which is the only
//! cross-process mutual exclusion between concurrent bootstraps of the same
//! name. An empty placeholder reads back as an uninitialised record; a
//! populated one carries the administrative credentials, the state-server
//! endpoint and the bootstrap configuration captured when the environment
//! was prepared.
//!
//! Writes go through a sibling temporary file that is synced and renamed over
//! the artefact, so readers observe either the previous record or the new
//! one, never a torn write.

mod disk;
mod error;
mod info;

#[cfg(test)]
mod tests;

pub use self::disk::{DiskStore, EnvironInfoStore};
pub use self::error::StoreError;
pub use self::info::{ApiCredentials, ApiEndpoint, EnvironInfo};

pub(crate) const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");
