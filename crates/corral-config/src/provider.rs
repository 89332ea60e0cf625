use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Infrastructure backend selected for an environment.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ProviderKind {
    /// Containers on the invoking host.
    #[default]
    Local,
    /// Microsoft Azure virtual machines.
    Azure,
    /// Amazon EC2 instances.
    Ec2,
}

/// Errors encountered while parsing a [`ProviderKind`] from text.
pub type ProviderKindParseError = strum::ParseError;
