//! Provisioning pipeline tasks, one per checkpoint.

mod clone;
mod guest;
mod network;
mod placement;
mod power;
mod reconcile;
mod relocate;
mod validate;

pub use clone::{AwaitCloneTask, CloneTask};
pub use guest::GuestCustomizeTask;
pub use network::NetworkSpecTask;
pub use placement::{
    DatacenterTask, DatastoreTask, FolderTask, HostTask, ResourcePoolTask, TemplateTask,
};
pub use power::{GuestBootTask, PowerOnTask};
pub use reconcile::ReconcileDevicesTask;
pub use relocate::RelocateSpecTask;
pub use validate::ValidateTask;

use super::types::ProvisionContext;
use std::sync::Arc;
use tokio::sync::Mutex;
use vmfleet_shared::FleetError;

pub type ProvisionCtx = Arc<Mutex<ProvisionContext>>;

/// Log the task start and return the instance name for later log lines.
pub(crate) async fn task_start(ctx: &ProvisionCtx, task_name: &str) -> String {
    let instance = ctx.lock().await.spec.name.clone();
    tracing::debug!(instance = %instance, task = task_name, "Starting provisioning task");
    instance
}

pub(crate) fn log_task_error(instance: &str, task_name: &str, error: &FleetError) {
    tracing::error!(
        instance = %instance,
        task = task_name,
        kind = error.kind(),
        "Provisioning task failed: {}",
        error
    );
}

/// Error for a context output an earlier task should have filled in.
pub(crate) fn missing(what: &str) -> FleetError {
    FleetError::Internal(format!("{} task must run first", what))
}
