//! Task: Input validation.
//!
//! Rejects malformed specifications before any platform call.

use super::{ProvisionCtx, log_task_error, task_start};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use vmfleet_shared::{FleetError, FleetResult};

pub struct ValidateTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for ValidateTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let ctx = ctx.lock().await;
        validate(&ctx.spec, ctx.config.guest.auth().is_some())
            .inspect_err(|e| log_task_error(&instance, task_name, e))
    }

    fn name(&self) -> &str {
        "validate"
    }
}

fn validate(spec: &crate::spec::InstanceSpec, has_guest_auth: bool) -> FleetResult<()> {
    spec.validate()?;

    // The address rewrite runs in the guest and needs credentials.
    if spec.primary_address()?.is_some() && !has_guest_auth {
        return Err(FleetError::InputValidationFailed(format!(
            "instance '{}' has a static address but no guest credentials are configured",
            spec.name
        )));
    }
    Ok(())
}
