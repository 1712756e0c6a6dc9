//! Tasks: Clone submission and completion.

use super::{ProvisionCtx, log_task_error, missing, task_start};
use crate::pipeline::PipelineTask;
use crate::platform::builders;
use async_trait::async_trait;
use vmfleet_shared::FleetResult;

pub struct CloneTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for CloneTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, template, folder, clone_spec) = {
            let ctx = ctx.lock().await;
            let template = ctx.template.clone().ok_or_else(|| missing("template"))?;
            let folder = ctx.folder.clone().ok_or_else(|| missing("folder"))?;
            let relocate = ctx.relocate.clone().ok_or_else(|| missing("relocate_spec"))?;
            let nics = ctx.nics.as_ref().ok_or_else(|| missing("network_specs"))?;
            let devices: Vec<_> = nics.iter().map(|nic| nic.device.clone()).collect();

            let config = builders::build_vm_config(
                ctx.spec.num_cpus,
                ctx.spec.memory_mb,
                &devices,
                &ctx.spec.clone_extra_config(),
            );
            (
                ctx.client.clone(),
                template,
                folder,
                builders::build_clone_spec(relocate, config),
            )
        };

        let task = client
            .clone_vm(&template, &folder, &instance, &clone_spec)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        tracing::info!(
            instance = %instance,
            template = %template.inventory_path,
            folder = %folder.inventory_path,
            task = %task.reference,
            "Clone submitted"
        );

        ctx.lock().await.clone_task = Some(task);
        Ok(())
    }

    fn name(&self) -> &str {
        "clone_submit"
    }
}

pub struct AwaitCloneTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for AwaitCloneTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, task, folder) = {
            let mut ctx = ctx.lock().await;
            let task = ctx.clone_task.take().ok_or_else(|| missing("clone_submit"))?;
            let folder = ctx.folder.clone().ok_or_else(|| missing("folder"))?;
            (ctx.client.clone(), task, folder)
        };

        let vm = client
            .await_clone(&task, &folder, &instance)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        tracing::info!(instance = %instance, vm = %vm.reference, "Clone finished");

        ctx.lock().await.vm = Some(vm);
        Ok(())
    }

    fn name(&self) -> &str {
        "clone_wait"
    }
}
