//! The single instance of a local environment.

use corral_config::ProviderKind;

use crate::error::ProviderError;
use crate::instance::{Instance, Port};

/// Identifier of the host running a local environment.
pub const LOCAL_INSTANCE_ID: &str = "localhost";

/// The invoking host, seen as an instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalInstance;

impl Instance for LocalInstance {
    fn id(&self) -> &str {
        LOCAL_INSTANCE_ID
    }

    fn dns_name(&self) -> Result<String, ProviderError> {
        Ok(LOCAL_INSTANCE_ID.to_owned())
    }

    fn wait_dns_name(&self) -> Result<String, ProviderError> {
        self.dns_name()
    }

    fn open_ports(&self, _machine_id: &str, _ports: &[Port]) -> Result<(), ProviderError> {
        Err(ProviderError::not_implemented(ProviderKind::Local, "open ports"))
    }

    fn close_ports(&self, _machine_id: &str, _ports: &[Port]) -> Result<(), ProviderError> {
        Err(ProviderError::not_implemented(ProviderKind::Local, "close ports"))
    }

    fn ports(&self, _machine_id: &str) -> Result<Vec<Port>, ProviderError> {
        Err(ProviderError::not_implemented(ProviderKind::Local, "ports"))
    }
}
