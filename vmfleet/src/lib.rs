//! vmfleet - concurrent template-clone provisioning for VM fleets.
//!
//! A batch of [`InstanceSpec`]s is fanned out to one provisioning pipeline
//! per instance. Each pipeline clones its VM from a template, replaces its
//! network devices, powers it on and rewrites the guest's address, and
//! reports a single [`Outcome`]. The platform is reached only through
//! [`PlatformClient`].

pub mod config;
pub mod fleet;
pub mod logging;
pub mod pipeline;
pub mod platform;
pub mod provision;
pub mod spec;

pub use config::FleetConfig;
pub use fleet::{AbortPolicy, AbortSignal, BatchReport, FleetCoordinator, Outcome};
pub use platform::{PlatformApi, PlatformClient};
pub use provision::{InstanceProvisioner, ProvisionState};
pub use spec::InstanceSpec;
pub use vmfleet_shared::{FleetError, FleetResult};
