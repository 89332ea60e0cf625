//! Error types and diagnostics helpers for the CLI runtime.

use std::error::Error as _;
use std::io;
use std::sync::Arc;

use corral_config::ConfigError;
use corral_provider::{ConstraintsError, ProviderError};
use corral_statedb::StateDbError;
use corral_store::StoreError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Constraints(#[from] ConstraintsError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    StateDb(#[from] StateDbError),
    #[error("{key} must be set")]
    MissingSetting { key: &'static str },
    #[error("destruction of environment '{name}' aborted")]
    DestroyAborted { name: String },
    #[error("failed to read confirmation: {0}")]
    Prompt(io::Error),
    #[error("failed to write output: {0}")]
    Output(io::Error),
}

/// Renders `error` followed by each cause its message does not already
/// include.
pub(crate) fn render_chain(error: &AppError) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str("\n  caused by: ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}
