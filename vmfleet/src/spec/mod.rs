//! Instance specifications and the batch file they are read from.

mod batch;
mod instance;

pub use batch::{parse_batch, read_batch};
pub use instance::{GuestSettings, HardDisk, InstanceSpec, NetworkInterface};
