//! Types shared between the vmfleet library, its binary and platform bindings.

pub mod errors;

pub use errors::{FleetError, FleetResult};
