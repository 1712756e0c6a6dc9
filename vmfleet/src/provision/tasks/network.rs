//! Task: Network device specs.
//!
//! One NIC spec and one IP customization per interface.

use super::{ProvisionCtx, log_task_error, missing, task_start};
use crate::pipeline::PipelineTask;
use crate::platform::{DatacenterHandle, PlatformClient, builders};
use crate::provision::types::NicPlan;
use crate::spec::NetworkInterface;
use async_trait::async_trait;
use vmfleet_shared::FleetResult;

pub struct NetworkSpecTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for NetworkSpecTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, datacenter, interfaces) = {
            let ctx = ctx.lock().await;
            let datacenter = ctx.datacenter.clone().ok_or_else(|| missing("datacenter"))?;
            (ctx.client.clone(), datacenter, ctx.spec.interfaces.clone())
        };

        let mut nics = Vec::with_capacity(interfaces.len());
        for nic in &interfaces {
            let plan = build_nic_plan(&client, &datacenter, nic)
                .await
                .inspect_err(|e| log_task_error(&instance, task_name, e))?;
            nics.push(plan);
        }
        tracing::debug!(instance = %instance, nics = nics.len(), "Built network device specs");

        ctx.lock().await.nics = Some(nics);
        Ok(())
    }

    fn name(&self) -> &str {
        "network_specs"
    }
}

async fn build_nic_plan(
    client: &PlatformClient,
    datacenter: &DatacenterHandle,
    nic: &NetworkInterface,
) -> FleetResult<NicPlan> {
    let ip = builders::build_ip_customization(
        nic.ipv4_address()?,
        nic.prefix_length,
        nic.ipv4_gateway()?,
    )?;
    let device = client
        .build_network_device(datacenter, nic.label.as_deref(), &nic.adapter)
        .await?;

    Ok(NicPlan { device, ip })
}
