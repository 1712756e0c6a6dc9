//! Stage/task executor behind the provisioning state machine.
//!
//! A plan is a table of stages. Every stage is labelled with the state an
//! instance is in while it runs, and holds tasks that run one after another
//! or all at once:
//!
//! ```text
//! ExecutionPlan ──► Stage(state, mode) ──► PipelineTask × n
//!        │
//!        └─ StageGate checked before each stage
//! ```
//!
//! A failing task ends the run; the failure carries the stage's state, the
//! task name and the metrics gathered so far.
//!
//! ```ignore
//! let plan = ExecutionPlan::new(vec![
//!     Stage::sequential(State::Lookup, vec![Box::new(FindHost)]),
//!     Stage::parallel(State::Build, vec![Box::new(NicSpec), Box::new(DiskSpec)]),
//! ]);
//! let ctx = Arc::new(Mutex::new(Context::default()));
//! match PipelineExecutor::execute(plan, ctx, &NoGate).await {
//!     Ok(metrics) => println!("done in {}ms", metrics.total_duration_ms),
//!     Err(failure) => println!("{:?} failed: {}", failure.state, failure.error),
//! }
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod task;

pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use pipeline::{ExecutionPlan, NoGate, PipelineExecutor, PipelineFailure, StageGate};
pub use stage::{ExecutionMode, Stage};
pub use task::{BoxedTask, PipelineTask};
