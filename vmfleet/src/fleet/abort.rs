//! Batch-wide abort signal.

use crate::pipeline::StageGate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What an instance does once another instance in its batch has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Failures stay local; every instance runs to its own end.
    #[default]
    Continue,
    /// Instances stop before their next stage once any failure is signalled.
    Abort,
}

#[derive(Debug, Default)]
struct AbortState {
    aborted: bool,
    cause: Option<String>,
}

/// Advisory stop flag shared by the provisioners of one batch.
///
/// Never cancels in-flight platform calls; provisioners consult it before
/// each stage. Cloning the signal shares the flag.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    policy: AbortPolicy,
    state: Arc<Mutex<AbortState>>,
}

impl AbortSignal {
    pub fn new(policy: AbortPolicy) -> Self {
        Self {
            policy,
            state: Arc::new(Mutex::new(AbortState::default())),
        }
    }

    pub fn policy(&self) -> AbortPolicy {
        self.policy
    }

    /// Record a failure. Returns `true` only for the call that moved the
    /// signal from continue to abort.
    pub fn signal_and_acknowledge(&self, cause: &str) -> bool {
        let mut state = self.state.lock();
        if state.aborted {
            tracing::debug!(
                cause = %cause,
                first_cause = state.cause.as_deref().unwrap_or_default(),
                "Abort already signalled"
            );
            return false;
        }

        state.aborted = true;
        state.cause = Some(cause.to_string());
        match self.policy {
            AbortPolicy::Abort => tracing::warn!(cause = %cause, "Abort signalled, remaining instances stop before their next stage"),
            AbortPolicy::Continue => tracing::info!(cause = %cause, "First failure in batch, other instances continue"),
        }
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Cause recorded by the transitioning call.
    pub fn cause(&self) -> Option<String> {
        self.state.lock().cause.clone()
    }
}

impl StageGate for AbortSignal {
    fn should_stop(&self) -> bool {
        self.policy == AbortPolicy::Abort && self.is_aborted()
    }
}
