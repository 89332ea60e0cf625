//! Log output selection shared by every `corral` entry point.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::defaults::DEFAULT_LOG_FILTER;

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Single-line text for terminals.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Resolved logging settings handed to the telemetry installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    filter: String,
    format: LogFormat,
}

impl LogSettings {
    /// Builds settings, falling back to the default filter when `filter` is
    /// blank.
    #[must_use]
    pub fn new(filter: &str, format: LogFormat) -> Self {
        let trimmed = filter.trim();
        let filter = if trimmed.is_empty() {
            DEFAULT_LOG_FILTER
        } else {
            trimmed
        };
        Self {
            filter: filter.to_owned(),
            format,
        }
    }

    /// `EnvFilter` directive string.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Output format.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }
}
