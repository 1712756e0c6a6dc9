use async_trait::async_trait;
use vmfleet_shared::FleetResult;

/// A single checkpoint of a plan.
///
/// Each task gets its own clone of the context handle; writes go through
/// whatever interior mutability `Ctx` provides. An `Err` ends the run in the
/// owning stage's state.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> FleetResult<()>;

    /// Stable name used in logs, metrics and failure reports.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
