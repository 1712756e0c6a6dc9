//! Platform layer.
//!
//! [`PlatformApi`] is the primitive surface a binding implements;
//! [`PlatformClient`] composes those primitives into the operations the
//! provisioner consumes. [`sim::SimulatedPlatform`] is an in-memory binding.

mod api;
pub mod builders;
mod client;
pub mod sim;
mod types;

pub use api::PlatformApi;
pub use client::{PlatformClient, PollPolicy, ReconcileSummary};
pub use types::*;
