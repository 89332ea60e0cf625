//! Structured reporting for bootstrap lifecycle events.

use std::sync::Arc;

use crate::ORCHESTRATOR_TARGET;
use crate::error::ProviderError;
use crate::phase::BootstrapPhase;

/// Observer notified as a bootstrap moves between phases.
pub trait BootstrapReporter: Send + Sync {
    /// Invoked after every accepted transition.
    fn phase_changed(&self, environment: &str, from: BootstrapPhase, to: BootstrapPhase);

    /// Invoked when a bootstrap step fails, before it is unwound.
    fn bootstrap_failed(&self, environment: &str, phase: BootstrapPhase, error: &ProviderError);

    /// Invoked when unwinding itself hits an error; the original failure is
    /// still the one returned.
    fn cleanup_failed(&self, environment: &str, step: &'static str, error: &ProviderError);
}

impl<T> BootstrapReporter for Arc<T>
where
    T: BootstrapReporter,
{
    fn phase_changed(&self, environment: &str, from: BootstrapPhase, to: BootstrapPhase) {
        (**self).phase_changed(environment, from, to);
    }

    fn bootstrap_failed(&self, environment: &str, phase: BootstrapPhase, error: &ProviderError) {
        (**self).bootstrap_failed(environment, phase, error);
    }

    fn cleanup_failed(&self, environment: &str, step: &'static str, error: &ProviderError) {
        (**self).cleanup_failed(environment, step, error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredReporter;

impl StructuredReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BootstrapReporter for StructuredReporter {
    fn phase_changed(&self, environment: &str, from: BootstrapPhase, to: BootstrapPhase) {
        tracing::info!(
            target: ORCHESTRATOR_TARGET,
            event = "phase_changed",
            environment,
            from = %from,
            to = %to,
            "bootstrap phase changed"
        );
    }

    fn bootstrap_failed(&self, environment: &str, phase: BootstrapPhase, error: &ProviderError) {
        tracing::error!(
            target: ORCHESTRATOR_TARGET,
            event = "bootstrap_failed",
            environment,
            phase = %phase,
            error = %error,
            "bootstrap failed"
        );
    }

    fn cleanup_failed(&self, environment: &str, step: &'static str, error: &ProviderError) {
        tracing::warn!(
            target: ORCHESTRATOR_TARGET,
            event = "cleanup_failed",
            environment,
            step,
            error = %error,
            "bootstrap cleanup step failed"
        );
    }
}
