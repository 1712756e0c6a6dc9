//! Task: Guest customization.
//!
//! Static instances rewrite the template's placeholder address in the
//! guest's interface file, reboot, then wait for the guest to report an
//! address. DHCP instances only wait for an address. Nothing is retried.

use super::{ProvisionCtx, log_task_error, missing, task_start};
use crate::config::GuestConfig;
use crate::pipeline::PipelineTask;
use crate::platform::{GuestProgramSpec, IpCustomization};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use vmfleet_shared::{FleetError, FleetResult};

pub struct GuestCustomizeTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for GuestCustomizeTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, vm, address, guest, ip_policy) = {
            let ctx = ctx.lock().await;
            let vm = ctx.vm.clone().ok_or_else(|| missing("clone_wait"))?;
            let nics = ctx.nics.as_ref().ok_or_else(|| missing("network_specs"))?;
            let address = match nics.first().map(|nic| &nic.ip) {
                Some(IpCustomization::Fixed { address, .. }) => Some(*address),
                _ => None,
            };
            (
                ctx.client.clone(),
                vm,
                address,
                ctx.config.guest.clone(),
                ctx.config.polling.guest_ip(),
            )
        };

        if let Some(address) = address {
            let auth = guest
                .auth()
                .ok_or_else(|| {
                    FleetError::InputValidationFailed(
                        "guest credentials are not configured".to_string(),
                    )
                })
                .inspect_err(|e| log_task_error(&instance, task_name, e))?;
            let program = rewrite_program(&guest, address);

            let pid = client
                .run_guest_program(&vm, &auth, &program)
                .await
                .inspect_err(|e| log_task_error(&instance, task_name, e))?;
            tracing::info!(instance = %instance, pid, address = %address, "Address rewrite started in guest");

            client
                .reboot_guest(&vm)
                .await
                .inspect_err(|e| log_task_error(&instance, task_name, e))?;
            tracing::info!(instance = %instance, "Guest rebooting");
        } else {
            tracing::debug!(instance = %instance, "DHCP instance, skipping address rewrite");
        }

        let ip = client
            .wait_for_guest_ip(&vm, ip_policy)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;

        match address {
            Some(expected) if ip != IpAddr::V4(expected) => tracing::warn!(
                instance = %instance,
                expected = %expected,
                reported = %ip,
                "Guest reports a different address than configured"
            ),
            _ => tracing::info!(instance = %instance, ip = %ip, "Guest reports address"),
        }

        ctx.lock().await.guest_ip = Some(ip);
        Ok(())
    }

    fn name(&self) -> &str {
        "guest_customize"
    }
}

/// In-guest program replacing the placeholder address with `address`.
fn rewrite_program(guest: &GuestConfig, address: Ipv4Addr) -> GuestProgramSpec {
    let placeholder = guest.placeholder_address.to_string().replace('.', r"\.");

    GuestProgramSpec {
        program_path: guest.program_path.clone(),
        arguments: format!(
            "-i 's/{}/{}/g' {}",
            placeholder, address, guest.interface_file
        ),
        working_directory: guest.working_directory.clone(),
        env_variables: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_program_escapes_placeholder() {
        let program = rewrite_program(&GuestConfig::default(), Ipv4Addr::new(10, 10, 12, 40));
        assert_eq!(program.program_path, "/bin/sed");
        assert_eq!(
            program.arguments,
            r"-i 's/10\.10\.10\.10/10.10.12.40/g' /etc/sysconfig/network-scripts/ifcfg-eth0"
        );
        assert_eq!(program.working_directory, "/");
    }
}
