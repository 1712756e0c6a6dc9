//! Task: Relocate spec.
//!
//! Targets the template's disk with the first disk descriptor's provisioning
//! type. Later descriptors don't influence the relocate spec; they are added
//! as extra disks after the clone.

use super::{ProvisionCtx, log_task_error, missing, task_start};
use crate::pipeline::PipelineTask;
use crate::platform::builders;
use async_trait::async_trait;
use vmfleet_shared::{FleetError, FleetResult};

pub struct RelocateSpecTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for RelocateSpecTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, template, pool, datastore, host, first_disk) = {
            let ctx = ctx.lock().await;
            let template = ctx.template.clone().ok_or_else(|| missing("template"))?;
            let pool = ctx
                .resource_pool
                .clone()
                .ok_or_else(|| missing("resource_pool"))?;
            let datastore = ctx.datastore.clone().ok_or_else(|| missing("datastore"))?;
            let host = ctx.host.clone().ok_or_else(|| missing("host"))?;
            (
                ctx.client.clone(),
                template,
                pool,
                datastore,
                host,
                ctx.spec.disks.first().copied(),
            )
        };

        let first_disk = first_disk
            .ok_or_else(|| {
                FleetError::InputValidationFailed(format!(
                    "instance '{}' has no hard disk for the relocate spec",
                    instance
                ))
            })
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;

        let disk_key = client
            .template_disk_key(&template)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;

        let relocate = builders::build_relocate_spec(
            &pool,
            &datastore,
            &host,
            disk_key,
            first_disk.provisioning,
        );
        tracing::debug!(
            instance = %instance,
            disk_key,
            provisioning = ?first_disk.provisioning,
            "Built relocate spec"
        );

        ctx.lock().await.relocate = Some(relocate);
        Ok(())
    }

    fn name(&self) -> &str {
        "relocate_spec"
    }
}
