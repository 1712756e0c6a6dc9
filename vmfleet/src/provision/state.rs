use serde::Serialize;
use std::fmt;

/// Provisioning state of one instance.
///
/// Strictly linear: each state is entered once, in declaration order. A
/// failure terminates the instance in the state it happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ProvisionState {
    /// Input checks, before any platform call.
    Validating,
    ResolvingPlacement,
    RelocatingSpecBuilt,
    NetworkSpecsBuilt,
    Cloning,
    AwaitingCloneTask,
    DeviceReconciliation,
    PoweredOn,
    GuestBooting,
    GuestCustomizing,
    /// Terminal success.
    Ready,
}

impl ProvisionState {
    /// States that issue platform mutations (clone onwards).
    pub fn mutates_platform(self) -> bool {
        self >= ProvisionState::Cloning && self != ProvisionState::Ready
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionState::Validating => "Validating",
            ProvisionState::ResolvingPlacement => "ResolvingPlacement",
            ProvisionState::RelocatingSpecBuilt => "RelocatingSpecBuilt",
            ProvisionState::NetworkSpecsBuilt => "NetworkSpecsBuilt",
            ProvisionState::Cloning => "Cloning",
            ProvisionState::AwaitingCloneTask => "AwaitingCloneTask",
            ProvisionState::DeviceReconciliation => "DeviceReconciliation",
            ProvisionState::PoweredOn => "PoweredOn",
            ProvisionState::GuestBooting => "GuestBooting",
            ProvisionState::GuestCustomizing => "GuestCustomizing",
            ProvisionState::Ready => "Ready",
        }
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
