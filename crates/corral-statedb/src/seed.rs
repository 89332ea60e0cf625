//! Initial state for a freshly bootstrapped environment.

use tracing::info;

use crate::SEED_TARGET;
use crate::error::StateDbError;
use crate::session::StateSession;

/// Job assigned to the first machine.
pub const MANAGE_ENVIRON_JOB: &str = "manage-environ";

/// Values required to seed the state database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSeed {
    /// State server addresses recorded in the environment.
    pub state_servers: Vec<String>,
    /// Provider instance backing machine `0`.
    pub instance_id: String,
    /// Provider type of the environment.
    pub env_type: String,
}

impl StateSeed {
    /// Validates optional inputs, naming the first missing flag.
    ///
    /// # Errors
    ///
    /// Returns [`StateDbError::MissingFlag`] for `state-servers`,
    /// `instance-id` or `env-type`, checked in that order.
    pub fn from_flags(
        state_servers: Option<Vec<String>>,
        instance_id: Option<String>,
        env_type: Option<String>,
    ) -> Result<Self, StateDbError> {
        let state_servers = state_servers
            .filter(|servers| !servers.is_empty())
            .ok_or(StateDbError::MissingFlag {
                flag: "state-servers",
            })?;
        let instance_id = instance_id
            .filter(|value| !value.is_empty())
            .ok_or(StateDbError::MissingFlag {
                flag: "instance-id",
            })?;
        let env_type = env_type
            .filter(|value| !value.is_empty())
            .ok_or(StateDbError::MissingFlag { flag: "env-type" })?;
        Ok(Self {
            state_servers,
            instance_id,
            env_type,
        })
    }
}

/// Creates the environment record and machine `0`, returning the machine id.
///
/// # Errors
///
/// Returns [`StateDbError::Session`] naming the step that failed.
pub fn seed_state(
    session: &mut dyn StateSession,
    seed: &StateSeed,
) -> Result<String, StateDbError> {
    session
        .initialize_environment(&seed.env_type, &seed.state_servers)
        .map_err(|source| StateDbError::Session {
            operation: "initialize",
            source,
        })?;
    let machine = session
        .add_machine(&[MANAGE_ENVIRON_JOB])
        .map_err(|source| StateDbError::Session {
            operation: "add machine",
            source,
        })?;
    session
        .set_instance_id(&machine, &seed.instance_id)
        .map_err(|source| StateDbError::Session {
            operation: "set instance id",
            source,
        })?;
    info!(
        target: SEED_TARGET,
        machine = %machine,
        instance_id = %seed.instance_id,
        env_type = %seed.env_type,
        "state initialised"
    );
    Ok(machine)
}
