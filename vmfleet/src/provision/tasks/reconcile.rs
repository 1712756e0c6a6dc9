//! Task: Device reconciliation on the new VM.
//!
//! Replaces every NIC the clone inherited with the planned ones, then adds
//! the extra disks (every descriptor after the first with a size).

use super::{ProvisionCtx, log_task_error, missing, task_start};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use vmfleet_shared::FleetResult;

pub struct ReconcileDevicesTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for ReconcileDevicesTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, vm, datastore, devices, extra_disks) = {
            let ctx = ctx.lock().await;
            let vm = ctx.vm.clone().ok_or_else(|| missing("clone_wait"))?;
            let datastore = ctx.datastore.clone().ok_or_else(|| missing("datastore"))?;
            let nics = ctx.nics.as_ref().ok_or_else(|| missing("network_specs"))?;
            let devices: Vec<_> = nics.iter().map(|nic| nic.device.clone()).collect();
            let extra_disks: Vec<_> = ctx
                .spec
                .disks
                .iter()
                .skip(1)
                .filter(|disk| disk.size_gb > 0)
                .copied()
                .collect();
            (ctx.client.clone(), vm, datastore, devices, extra_disks)
        };

        let summary = client
            .reconcile_network_devices(&vm, &devices)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;

        for disk in &extra_disks {
            let iops_limit = (disk.iops_limit != 0).then_some(disk.iops_limit);
            client
                .add_hard_disk(&vm, &datastore, disk.size_gb, iops_limit, disk.provisioning)
                .await
                .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        }

        tracing::info!(
            instance = %instance,
            nics_removed = summary.removed,
            nics_added = summary.added,
            disks_added = extra_disks.len(),
            "Reconciled devices"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "device_reconcile"
    }
}
