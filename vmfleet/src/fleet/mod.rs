//! Fleet coordination.
//!
//! ```text
//! specs ──► WorkerPool (bounded) ──► InstanceProvisioner × N
//!                                          │ one Outcome each
//!                                          ▼
//!                 BatchReport ◄── mpsc result channel
//! ```
//!
//! All provisioners of a batch share one `PlatformClient` and one
//! `AbortSignal`.

mod abort;
mod coordinator;
mod outcome;
mod pool;
pub mod report;

pub use abort::{AbortPolicy, AbortSignal};
pub use coordinator::{BatchReport, FleetCoordinator};
pub use outcome::{Failure, Outcome};
pub use pool::{WorkerPanic, WorkerPool};
