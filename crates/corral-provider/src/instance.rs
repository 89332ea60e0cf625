//! Instances started by a provider.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A network port opened on an instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Port {
    /// `tcp` or `udp`.
    pub protocol: String,
    /// Port number.
    pub number: u16,
}

impl fmt::Display for Port {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.number, self.protocol)
    }
}

/// Hardware reported for a launched instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareCharacteristics {
    /// Processor architecture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    /// Memory in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem: Option<u64>,
    /// Core count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u64>,
}

impl fmt::Display for HardwareCharacteristics {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut terms = Vec::new();
        if let Some(arch) = &self.arch {
            terms.push(format!("arch={arch}"));
        }
        if let Some(mem) = self.mem {
            terms.push(format!("mem={mem}M"));
        }
        if let Some(cores) = self.cpu_cores {
            terms.push(format!("cpu-cores={cores}"));
        }
        formatter.write_str(&terms.join(" "))
    }
}

/// The state server instance produced by a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedInstance {
    /// Provider identifier of the instance.
    pub id: String,
    /// Hardware the instance runs on.
    pub hardware: HardwareCharacteristics,
    /// API addresses served by the instance, as `host:port`.
    pub api_addresses: Vec<String>,
}

/// A machine managed by a provider.
pub trait Instance: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> &str;

    /// DNS name, if one has been assigned.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider cannot be queried.
    fn dns_name(&self) -> Result<String, ProviderError>;

    /// Waits until the DNS name is assigned.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider cannot be queried.
    fn wait_dns_name(&self) -> Result<String, ProviderError>;

    /// Opens `ports` for `machine_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the ports cannot be opened.
    fn open_ports(&self, machine_id: &str, ports: &[Port]) -> Result<(), ProviderError>;

    /// Closes `ports` for `machine_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the ports cannot be closed.
    fn close_ports(&self, machine_id: &str, ports: &[Port]) -> Result<(), ProviderError>;

    /// Ports currently open for `machine_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the ports cannot be listed.
    fn ports(&self, machine_id: &str) -> Result<Vec<Port>, ProviderError>;
}
