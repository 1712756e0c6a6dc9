use crate::provision::ProvisionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use vmfleet_shared::FleetError;

/// Why an instance failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// State the instance failed in; `None` when its worker died without
    /// reporting one.
    pub state: Option<ProvisionState>,
    /// Error kind, e.g. `NotFound` or `Timeout`.
    pub kind: &'static str,
    /// Task that failed; `None` when the abort signal stopped the instance.
    pub task: Option<String>,
    pub reason: String,
}

/// Terminal record of one instance. Exactly one per specification.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    /// Position of the specification in the batch.
    pub index: usize,
    /// Instance name.
    pub identity: String,
    pub failure: Option<Failure>,
    pub detail: String,
    pub duration_ms: u128,
    pub finished_at: DateTime<Utc>,
}

impl Outcome {
    pub fn ready(index: usize, identity: String, detail: String, duration_ms: u128) -> Self {
        Self {
            index,
            identity,
            failure: None,
            detail,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        index: usize,
        identity: String,
        state: ProvisionState,
        task: Option<String>,
        error: &FleetError,
        duration_ms: u128,
    ) -> Self {
        let reason = error.to_string();
        Self {
            index,
            identity,
            detail: format!("failed at {}: {}", state, reason),
            failure: Some(Failure {
                state: Some(state),
                kind: error.kind(),
                task,
                reason,
            }),
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    /// Outcome for a worker that ended without reporting, e.g. a panic.
    pub fn lost(index: usize, identity: String, reason: String, duration_ms: u128) -> Self {
        let error = FleetError::Internal(reason);
        let reason = error.to_string();
        Self {
            index,
            identity,
            detail: format!("worker failed: {}", reason),
            failure: Some(Failure {
                state: None,
                kind: error.kind(),
                task: None,
                reason,
            }),
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// `Ready` on success, the failed state otherwise.
    pub fn state(&self) -> Option<ProvisionState> {
        match &self.failure {
            None => Some(ProvisionState::Ready),
            Some(failure) => failure.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_carries_stage_and_kind() {
        let error = FleetError::NotFound("host esx-09".to_string());
        let outcome = Outcome::failed(
            1,
            "web-02".to_string(),
            ProvisionState::ResolvingPlacement,
            Some("host".to_string()),
            &error,
            12,
        );

        assert!(!outcome.succeeded());
        assert_eq!(outcome.state(), Some(ProvisionState::ResolvingPlacement));
        assert_eq!(outcome.detail, "failed at ResolvingPlacement: not found: host esx-09");
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, "NotFound");
        assert_eq!(failure.task.as_deref(), Some("host"));
    }

    #[test]
    fn test_ready_outcome() {
        let outcome = Outcome::ready(0, "web-01".to_string(), "ready".to_string(), 5);
        assert!(outcome.succeeded());
        assert_eq!(outcome.state(), Some(ProvisionState::Ready));
    }

    #[test]
    fn test_lost_outcome_has_no_state() {
        let outcome = Outcome::lost(3, "db-01".to_string(), "worker panicked".to_string(), 0);
        assert!(!outcome.succeeded());
        assert_eq!(outcome.state(), None);
        assert_eq!(outcome.failure.unwrap().kind, "Internal");
    }
}
