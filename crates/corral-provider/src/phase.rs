//! Lifecycle phases of a bootstrap.

use strum::Display;

use crate::error::ProviderError;

/// Where a bootstrap stands.
///
/// The happy path runs `Unprepared → Prepared → InstanceLaunching →
/// DatabaseBootstrapping → RecordWriting → Bootstrapped`. Any non-terminal
/// phase may move to `Aborting`, which only leads to `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BootstrapPhase {
    /// Nothing has been touched.
    Unprepared,
    /// The record is reserved and the provider has prepared its resources.
    Prepared,
    /// The provider is starting the state server instance.
    InstanceLaunching,
    /// The admin credential is being injected into the state database.
    DatabaseBootstrapping,
    /// The record is being written.
    RecordWriting,
    /// The environment is up and recorded.
    Bootstrapped,
    /// A failure is being unwound.
    Aborting,
    /// Everything created so far has been removed.
    Destroyed,
}

impl BootstrapPhase {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Bootstrapped | Self::Destroyed)
    }

    /// Whether moving from `self` to `next` is legal.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Unprepared, Self::Prepared)
            | (Self::Prepared, Self::InstanceLaunching)
            | (Self::InstanceLaunching, Self::DatabaseBootstrapping)
            | (Self::DatabaseBootstrapping, Self::RecordWriting)
            | (Self::RecordWriting, Self::Bootstrapped)
            | (Self::Aborting, Self::Destroyed) => true,
            (current, Self::Aborting) => {
                !current.is_terminal() && !matches!(current, Self::Aborting)
            }
            _ => false,
        }
    }

    /// Returns `next` when the move is legal.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::IllegalTransition`] otherwise.
    pub const fn transition(self, next: Self) -> Result<Self, ProviderError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ProviderError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}
