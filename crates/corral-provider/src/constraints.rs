//! Instance constraints and the per-provider validator.
//!
//! Constraints arrive as whitespace-separated `key=value` pairs. Parsing
//! checks each value's shape; the [`ConstraintsValidator`] a provider hands
//! out then decides which keys it honours and which values it accepts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Architectures any provider may name.
pub const KNOWN_ARCHES: [&str; 6] = ["amd64", "i386", "armhf", "arm64", "ppc64el", "s390x"];

/// Constraint keys understood by the parser.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintKey {
    /// Processor architecture.
    Arch,
    /// Container type the machine must run in.
    Container,
    /// Minimum number of cores.
    CpuCores,
    /// Minimum processing power.
    CpuPower,
    /// Provider-specific instance type.
    InstanceType,
    /// Minimum memory in megabytes.
    Mem,
    /// Minimum root disk in megabytes.
    RootDisk,
    /// Provider tags the instance must carry.
    Tags,
}

/// Errors raised while parsing or validating constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintsError {
    /// A term was not of the form `key=value`.
    #[error("malformed constraint {term:?}")]
    Malformed {
        /// Offending term.
        term: String,
    },
    /// The key is not a known constraint.
    #[error("unknown constraint {key:?}")]
    UnknownKey {
        /// Offending key.
        key: String,
    },
    /// The same key was given twice.
    #[error("bad \"{key}\" constraint: already set")]
    Duplicate {
        /// Repeated key.
        key: ConstraintKey,
    },
    /// The value does not have the shape the key requires.
    #[error("bad {key:?} constraint: {reason}")]
    BadValue {
        /// Constraint key.
        key: String,
        /// Why the value was refused.
        reason: String,
    },
    /// The provider does not accept the value.
    #[error("invalid constraint value: {key}={value}\nvalid values are: [{}]", .valid.join(" "))]
    InvalidValue {
        /// Constraint key.
        key: ConstraintKey,
        /// Rejected value.
        value: String,
        /// Vocabulary accepted by the provider.
        valid: Vec<String>,
    },
}

/// A parsed set of constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    values: BTreeMap<ConstraintKey, String>,
}

impl Constraints {
    /// Constraints with nothing set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Keys that carry a value, in key order.
    pub fn keys(&self) -> impl Iterator<Item = ConstraintKey> + '_ {
        self.values.keys().copied()
    }

    /// Raw value recorded for `key`.
    #[must_use]
    pub fn get(&self, key: ConstraintKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Requested architecture.
    #[must_use]
    pub fn arch(&self) -> Option<&str> {
        self.get(ConstraintKey::Arch)
    }

    /// Requested core count.
    #[must_use]
    pub fn cpu_cores(&self) -> Option<u64> {
        self.get(ConstraintKey::CpuCores).and_then(|value| value.parse().ok())
    }

    /// Requested memory in megabytes.
    #[must_use]
    pub fn mem(&self) -> Option<u64> {
        self.get(ConstraintKey::Mem).and_then(|value| parse_megabytes(value).ok())
    }

    /// Requested tags.
    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        self.get(ConstraintKey::Tags)
            .map(|value| value.split(',').filter(|tag| !tag.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Whether no constraint is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromStr for Constraints {
    type Err = ConstraintsError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut values = BTreeMap::new();
        for term in text.split_whitespace() {
            let (raw_key, value) = term.split_once('=').ok_or_else(|| ConstraintsError::Malformed {
                term: term.to_owned(),
            })?;
            let key = ConstraintKey::from_str(raw_key).map_err(|_| ConstraintsError::UnknownKey {
                key: raw_key.to_owned(),
            })?;
            if values.contains_key(&key) {
                return Err(ConstraintsError::Duplicate { key });
            }
            if value.is_empty() {
                continue;
            }
            check_value(key, value)?;
            values.insert(key, value.to_owned());
        }
        Ok(Self { values })
    }
}

impl fmt::Display for Constraints {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.values {
            if !first {
                formatter.write_str(" ")?;
            }
            write!(formatter, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

fn check_value(key: ConstraintKey, value: &str) -> Result<(), ConstraintsError> {
    let bad = |reason: String| ConstraintsError::BadValue {
        key: key.to_string(),
        reason,
    };
    match key {
        ConstraintKey::Arch if !KNOWN_ARCHES.contains(&value) => {
            Err(bad(format!("{value:?} not recognized")))
        }
        ConstraintKey::CpuCores | ConstraintKey::CpuPower => value
            .parse::<u64>()
            .map(|_| ())
            .map_err(|_| bad(format!("{value:?} is not a non-negative integer"))),
        ConstraintKey::Mem | ConstraintKey::RootDisk => {
            parse_megabytes(value).map(|_| ()).map_err(bad)
        }
        _ => Ok(()),
    }
}

/// Parses a size with an optional `M`, `G`, `T` or `P` suffix into megabytes.
fn parse_megabytes(value: &str) -> Result<u64, String> {
    let (digits, multiplier) = match value.chars().next_back() {
        Some('M') => (value.trim_end_matches('M'), 1),
        Some('G') => (value.trim_end_matches('G'), 1024),
        Some('T') => (value.trim_end_matches('T'), 1024 * 1024),
        Some('P') => (value.trim_end_matches('P'), 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|amount| amount.checked_mul(multiplier))
        .ok_or_else(|| format!("{value:?} is not a size"))
}

/// Decides which constraints a provider honours.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintsValidator {
    unsupported: BTreeSet<ConstraintKey>,
    vocabularies: BTreeMap<ConstraintKey, Vec<String>>,
}

impl ConstraintsValidator {
    /// A validator that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `keys` as ignored by the provider.
    pub fn register_unsupported(&mut self, keys: &[ConstraintKey]) {
        self.unsupported.extend(keys.iter().copied());
    }

    /// Restricts `key` to `values`.
    pub fn register_vocabulary(&mut self, key: ConstraintKey, values: Vec<String>) {
        self.vocabularies.insert(key, values);
    }

    /// Checks `constraints`, returning the keys the provider will ignore.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintsError::InvalidValue`] when a value falls outside
    /// its registered vocabulary.
    pub fn validate(
        &self,
        constraints: &Constraints,
    ) -> Result<Vec<ConstraintKey>, ConstraintsError> {
        for (key, valid) in &self.vocabularies {
            if let Some(value) = constraints.get(*key) {
                if !valid.iter().any(|candidate| candidate == value) {
                    return Err(ConstraintsError::InvalidValue {
                        key: *key,
                        value: value.to_owned(),
                        valid: valid.clone(),
                    });
                }
            }
        }
        Ok(constraints
            .keys()
            .filter(|key| self.unsupported.contains(key))
            .collect())
    }
}

/// Architecture name of the invoking host.
#[must_use]
pub fn host_arch() -> &'static str {
    arch_name(std::env::consts::ARCH)
}

fn arch_name(rust_arch: &'static str) -> &'static str {
    match rust_arch {
        "x86_64" => "amd64",
        "x86" => "i386",
        "arm" => "armhf",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64el",
        other => other,
    }
}
