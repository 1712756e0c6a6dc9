//! Tasks: Placement resolution.
//!
//! ```text
//! 1. Datacenter                  (name or platform default, well-known folders)
//! 2. Template     ─┬─            (template VM by path)
//!    ResourcePool ─┤             (explicit > cluster root > default)
//!    Folder       ─┘             (explicit or VM folder, never fatal)
//! 3. Host                        (cluster segment of the pool path)
//!    Datastore                   (direct name or storage pod recommendation)
//! ```
//!
//! Each task copies what it needs out of the context and releases the lock
//! before calling the platform, so the middle stage runs concurrently.

use super::{ProvisionCtx, log_task_error, missing, task_start};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use vmfleet_shared::FleetResult;

pub struct DatacenterTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for DatacenterTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, name) = {
            let ctx = ctx.lock().await;
            (ctx.client.clone(), ctx.spec.datacenter.clone())
        };

        let datacenter = client
            .resolve_datacenter(name.as_deref())
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        let folders = client
            .datacenter_folders(&datacenter)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        tracing::debug!(instance = %instance, datacenter = %datacenter.inventory_path, "Resolved datacenter");

        let mut ctx = ctx.lock().await;
        ctx.datacenter = Some(datacenter);
        ctx.folders = Some(folders);
        Ok(())
    }

    fn name(&self) -> &str {
        "datacenter"
    }
}

pub struct TemplateTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for TemplateTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, datacenter, path) = {
            let ctx = ctx.lock().await;
            let datacenter = ctx.datacenter.clone().ok_or_else(|| missing("datacenter"))?;
            (ctx.client.clone(), datacenter, ctx.spec.template.clone())
        };

        let template = client
            .resolve_template(&datacenter, &path)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;

        let guest_id = client
            .guest_id(&template)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        if let Some(guest_id) = guest_id.filter(|id| id.to_ascii_lowercase().contains("win")) {
            tracing::warn!(
                instance = %instance,
                template = %template.inventory_path,
                guest_id = %guest_id,
                "Template guest is not Linux, the address rewrite may not apply"
            );
        }
        tracing::debug!(instance = %instance, template = %template.inventory_path, "Resolved template");

        ctx.lock().await.template = Some(template);
        Ok(())
    }

    fn name(&self) -> &str {
        "template"
    }
}

pub struct ResourcePoolTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for ResourcePoolTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, datacenter, explicit, cluster) = {
            let ctx = ctx.lock().await;
            let datacenter = ctx.datacenter.clone().ok_or_else(|| missing("datacenter"))?;
            (
                ctx.client.clone(),
                datacenter,
                ctx.spec.resource_pool.clone(),
                ctx.spec.cluster.clone(),
            )
        };

        let pool = client
            .resolve_resource_pool(&datacenter, explicit.as_deref(), cluster.as_deref())
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        tracing::debug!(instance = %instance, resource_pool = %pool.inventory_path, "Resolved resource pool");

        ctx.lock().await.resource_pool = Some(pool);
        Ok(())
    }

    fn name(&self) -> &str {
        "resource_pool"
    }
}

pub struct FolderTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for FolderTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, datacenter, folders, relative) = {
            let ctx = ctx.lock().await;
            let datacenter = ctx.datacenter.clone().ok_or_else(|| missing("datacenter"))?;
            let folders = ctx.folders.clone().ok_or_else(|| missing("datacenter"))?;
            (ctx.client.clone(), datacenter, folders, ctx.spec.folder.clone())
        };

        let folder = client
            .resolve_folder(&datacenter, &folders, relative.as_deref())
            .await;
        tracing::debug!(instance = %instance, folder = %folder.inventory_path, "Resolved folder");

        ctx.lock().await.folder = Some(folder);
        Ok(())
    }

    fn name(&self) -> &str {
        "folder"
    }
}

pub struct HostTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for HostTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, datacenter, folders, pool, host_name) = {
            let ctx = ctx.lock().await;
            let datacenter = ctx.datacenter.clone().ok_or_else(|| missing("datacenter"))?;
            let folders = ctx.folders.clone().ok_or_else(|| missing("datacenter"))?;
            let pool = ctx
                .resource_pool
                .clone()
                .ok_or_else(|| missing("resource_pool"))?;
            (
                ctx.client.clone(),
                datacenter,
                folders,
                pool,
                ctx.spec.host.clone(),
            )
        };

        let host = client
            .resolve_host(&datacenter, &folders, &pool, &host_name)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        tracing::debug!(instance = %instance, host = %host.inventory_path, "Resolved host");

        ctx.lock().await.host = Some(host);
        Ok(())
    }

    fn name(&self) -> &str {
        "host"
    }
}

pub struct DatastoreTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for DatastoreTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> FleetResult<()> {
        let task_name = self.name();
        let instance = task_start(&ctx, task_name).await;

        let (client, datacenter, folders, template, pool, name) = {
            let ctx = ctx.lock().await;
            let datacenter = ctx.datacenter.clone().ok_or_else(|| missing("datacenter"))?;
            let folders = ctx.folders.clone().ok_or_else(|| missing("datacenter"))?;
            let template = ctx.template.clone().ok_or_else(|| missing("template"))?;
            let pool = ctx
                .resource_pool
                .clone()
                .ok_or_else(|| missing("resource_pool"))?;
            (
                ctx.client.clone(),
                datacenter,
                folders,
                template,
                pool,
                ctx.spec.datastore.clone(),
            )
        };

        let datastore = client
            .resolve_datastore(&datacenter, &folders, &name, &template, &pool)
            .await
            .inspect_err(|e| log_task_error(&instance, task_name, e))?;
        tracing::debug!(instance = %instance, datastore = %datastore.inventory_path, "Resolved datastore");

        ctx.lock().await.datastore = Some(datastore);
        Ok(())
    }

    fn name(&self) -> &str {
        "datastore"
    }
}
