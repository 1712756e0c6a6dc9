//! Tasks: Power-on and guest boot.

use super::{ProvisionCtx, log_task_error, missing, task_start};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use vmfleet_shared::FleetResult;

pub struct PowerOnTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for PowerOnTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, vm) = {
            let ctx = ctx.lock().await;
            let vm = ctx.vm.clone().ok_or_else(|| missing("clone_wait"))?;
            (ctx.client.clone(), vm)
        };

        // Only a submission error fails the instance; GuestBooting observes
        // the actual power state.
        client
            .power_on(&vm)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        tracing::info!(instance = %instance, "Power-on submitted");
        Ok(())
    }

    fn name(&self) -> &str {
        "power_on"
    }
}

pub struct GuestBootTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for GuestBootTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, vm, power_on, tools) = {
            let ctx = ctx.lock().await;
            let vm = ctx.vm.clone().ok_or_else(|| missing("clone_wait"))?;
            (
                ctx.client.clone(),
                vm,
                ctx.config.polling.power_on(),
                ctx.config.polling.tools(),
            )
        };

        client
            .wait_for_power_on(&vm, power_on)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        tracing::debug!(instance = %instance, "Guest powered on");

        client
            .wait_for_tools_running(&vm, tools)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        tracing::info!(instance = %instance, "Guest tools running");
        Ok(())
    }

    fn name(&self) -> &str {
        "guest_boot"
    }
}
