//! Instance provisioning.
//!
//! ## Architecture
//!
//! Provisioning is table-driven; every stage is a checkpoint and carries the
//! state an instance fails in:
//!
//! ```text
//! Validating            1. Validate         (input checks, no platform call)
//! ResolvingPlacement    2. Datacenter
//!                       3. Template     ─┬─
//!                          ResourcePool  ─┤
//!                          Folder       ─┘
//!                       4. Host → Datastore
//! RelocatingSpecBuilt   5. RelocateSpec     (template disk key, first disk type)
//! NetworkSpecsBuilt     6. NetworkSpecs     (NIC spec + IP settings per interface)
//! Cloning               7. Clone            (submit, powered off)
//! AwaitingCloneTask     8. AwaitClone       (task result is the new VM)
//! DeviceReconciliation  9. ReconcileDevices (full NIC replace, extra disks)
//! PoweredOn            10. PowerOn          (submit only)
//! GuestBooting         11. GuestBoot        (power state, then tools)
//! GuestCustomizing     12. GuestCustomize   (rewrite, reboot, wait for IP)
//! ```
//!
//! The batch abort signal is consulted before every stage. Nothing is rolled
//! back: a VM created before a failure stays where it is.

mod state;
mod tasks;
mod types;

pub use state::ProvisionState;
pub use types::{NicPlan, ProvisionContext};

use crate::config::FleetConfig;
use crate::fleet::{AbortSignal, Outcome};
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineExecutor, PipelineMetrics, Stage};
use crate::platform::PlatformClient;
use crate::spec::InstanceSpec;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use vmfleet_shared::FleetError;

use tasks::{
    AwaitCloneTask, CloneTask, DatacenterTask, DatastoreTask, FolderTask, GuestBootTask,
    GuestCustomizeTask, HostTask, NetworkSpecTask, PowerOnTask, ProvisionCtx,
    ReconcileDevicesTask, RelocateSpecTask, ResourcePoolTask, TemplateTask, ValidateTask,
};

// ============================================================================
// EXECUTION PLAN
// ============================================================================

fn get_execution_plan() -> ExecutionPlan<ProvisionCtx, ProvisionState> {
    use ProvisionState::*;

    let stages: Vec<Stage<BoxedTask<ProvisionCtx>, ProvisionState>> = vec![
        Stage::sequential(Validating, vec![Box::new(ValidateTask)]),
        // Everything else is scoped to the datacenter
        Stage::sequential(ResolvingPlacement, vec![Box::new(DatacenterTask)]),
        Stage::parallel(
            ResolvingPlacement,
            vec![
                Box::new(TemplateTask),
                Box::new(ResourcePoolTask),
                Box::new(FolderTask),
            ],
        ),
        // Host needs the pool's cluster, datastore fallback needs template and pool
        Stage::sequential(
            ResolvingPlacement,
            vec![Box::new(HostTask), Box::new(DatastoreTask)],
        ),
        Stage::sequential(RelocatingSpecBuilt, vec![Box::new(RelocateSpecTask)]),
        Stage::sequential(NetworkSpecsBuilt, vec![Box::new(NetworkSpecTask)]),
        Stage::sequential(Cloning, vec![Box::new(CloneTask)]),
        Stage::sequential(AwaitingCloneTask, vec![Box::new(AwaitCloneTask)]),
        Stage::sequential(DeviceReconciliation, vec![Box::new(ReconcileDevicesTask)]),
        Stage::sequential(PoweredOn, vec![Box::new(PowerOnTask)]),
        Stage::sequential(GuestBooting, vec![Box::new(GuestBootTask)]),
        Stage::sequential(GuestCustomizing, vec![Box::new(GuestCustomizeTask)]),
    ];

    ExecutionPlan::new(stages)
}

fn log_stage_durations(instance: &str, metrics: &PipelineMetrics<ProvisionState>) {
    use ProvisionState::*;

    tracing::info!(
        instance = %instance,
        total_ms = metrics.total_duration_ms,
        placement_ms = metrics.state_duration_ms(&ResolvingPlacement).unwrap_or_default(),
        clone_ms = metrics.state_duration_ms(&AwaitingCloneTask).unwrap_or_default(),
        boot_ms = metrics.state_duration_ms(&GuestBooting).unwrap_or_default(),
        customize_ms = metrics.state_duration_ms(&GuestCustomizing).unwrap_or_default(),
        "Provisioning stages completed"
    );
}

/// Runs the provisioning pipeline of one instance at a time.
///
/// Cheap to clone; every worker of a batch holds one sharing the same
/// platform client and abort signal.
#[derive(Clone)]
pub struct InstanceProvisioner {
    client: PlatformClient,
    config: Arc<FleetConfig>,
    abort: AbortSignal,
}

impl InstanceProvisioner {
    pub fn new(client: PlatformClient, config: Arc<FleetConfig>, abort: AbortSignal) -> Self {
        Self {
            client,
            config,
            abort,
        }
    }

    /// Provision `spec` and report exactly one outcome.
    ///
    /// Never returns an error: every failure becomes a failed outcome and,
    /// unless it was itself an abort, signals the batch.
    pub async fn provision(&self, index: usize, spec: InstanceSpec) -> Outcome {
        let start = Instant::now();
        let instance = spec.name.clone();
        tracing::info!(instance = %instance, template = %spec.template, host = %spec.host, "Provisioning instance");

        let ctx = ProvisionContext::new(Arc::new(spec), self.client.clone(), Arc::clone(&self.config));
        let ctx: ProvisionCtx = Arc::new(Mutex::new(ctx));

        let result = PipelineExecutor::execute(get_execution_plan(), Arc::clone(&ctx), &self.abort).await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(metrics) => {
                log_stage_durations(&instance, &metrics);
                let detail = match ctx.lock().await.guest_ip {
                    Some(ip) => format!("ready at {}", ip),
                    None => "ready".to_string(),
                };
                tracing::info!(instance = %instance, duration_ms, "Instance ready");
                Outcome::ready(index, instance, detail, duration_ms)
            }
            Err(failure) => {
                if !matches!(failure.error, FleetError::Aborted(_)) {
                    self.abort
                        .signal_and_acknowledge(&format!("{} failed at {}", instance, failure.state));
                }
                if failure.state.mutates_platform() {
                    tracing::warn!(
                        instance = %instance,
                        state = %failure.state,
                        "Instance failed after cloning started, leaving the VM in place"
                    );
                }
                tracing::error!(
                    instance = %instance,
                    state = %failure.state,
                    task = failure.task.as_deref().unwrap_or("-"),
                    completed = ?failure.metrics.completed_tasks(),
                    "Instance failed: {}",
                    failure.error
                );
                Outcome::failed(
                    index,
                    instance,
                    failure.state,
                    failure.task,
                    &failure.error,
                    duration_ms,
                )
            }
        }
    }
}
