//! PlatformClient - the facade the provisioning pipeline talks to.
//!
//! Wraps a [`PlatformApi`] binding and layers the composite behaviour on
//! top of its primitive calls:
//! - default / priority resolution (datacenter, resource pool, folder)
//! - storage-pod fallback for datastore names
//! - full-replace NIC reconciliation
//! - bounded polling for power, tools and guest IP
//!
//! The client is cheap to clone and shared by every pipeline of a batch.
//! When the binding cannot take concurrent requests, every primitive call
//! goes through one async mutex here, so pipelines never coordinate.

use super::api::PlatformApi;
use super::builders;
use super::types::{
    AdapterType, CloneSpec, DatacenterFolders, DatacenterHandle, DatastoreHandle, FolderHandle,
    GuestAuth, GuestProgramSpec, HostHandle, ManagedObjectRef, NetworkDeviceSpec, ObjectKind,
    PlacementAction, PowerState, ProvisioningType, ResourcePoolHandle, TaskHandle, VirtualDevice,
    VmHandle,
};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use vmfleet_shared::{FleetError, FleetResult};

/// Bounded polling: at most `max_attempts` probes, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

/// Result of a full NIC replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileSummary {
    pub removed: usize,
    pub added: usize,
}

#[derive(Clone)]
pub struct PlatformClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    api: Arc<dyn PlatformApi>,
    /// Present when every primitive call must be serialized.
    serial: Option<Mutex<()>>,
}

impl std::fmt::Debug for PlatformClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformClient")
            .field("serialized", &self.is_serialized())
            .finish()
    }
}

impl PlatformClient {
    /// Create a client, serializing calls only if the binding requires it.
    pub fn new(api: Arc<dyn PlatformApi>) -> Self {
        Self::with_serialization(api, false)
    }

    /// Create a client; `force_serial` serializes calls even when the
    /// binding claims it can take concurrent requests.
    pub fn with_serialization(api: Arc<dyn PlatformApi>, force_serial: bool) -> Self {
        let serial = (force_serial || !api.supports_concurrent_requests()).then(|| Mutex::new(()));
        Self {
            inner: Arc::new(ClientInner { api, serial }),
        }
    }

    pub fn is_serialized(&self) -> bool {
        self.inner.serial.is_some()
    }

    fn api(&self) -> &dyn PlatformApi {
        self.inner.api.as_ref()
    }

    async fn serialize(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.inner.serial {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }

    // ========================================================================
    // RESOLUTION
    // ========================================================================

    /// Named datacenter, or the platform default when `name` is unset.
    pub async fn resolve_datacenter(&self, name: Option<&str>) -> FleetResult<DatacenterHandle> {
        let name = name.filter(|n| !n.is_empty());
        let _serial = self.serialize().await;
        self.api().find_datacenter(name).await
    }

    pub async fn datacenter_folders(&self, dc: &DatacenterHandle) -> FleetResult<DatacenterFolders> {
        let _serial = self.serialize().await;
        self.api().datacenter_folders(dc).await
    }

    pub async fn resolve_template(&self, dc: &DatacenterHandle, path: &str) -> FleetResult<VmHandle> {
        if path.is_empty() {
            return Err(FleetError::InputValidationFailed(
                "template path is empty".to_string(),
            ));
        }
        let _serial = self.serialize().await;
        self.api().find_virtual_machine(dc, path).await
    }

    /// Resource pool by priority: explicit path, then the cluster's root
    /// pool (`*<cluster>/Resources`), then the platform default.
    pub async fn resolve_resource_pool(
        &self,
        dc: &DatacenterHandle,
        explicit: Option<&str>,
        cluster: Option<&str>,
    ) -> FleetResult<ResourcePoolHandle> {
        let path = match (
            explicit.filter(|p| !p.is_empty()),
            cluster.filter(|c| !c.is_empty()),
        ) {
            (Some(path), _) => Some(path.to_string()),
            (None, Some(cluster)) => Some(format!("*{}/Resources", cluster)),
            (None, None) => None,
        };

        let _serial = self.serialize().await;
        self.api().find_resource_pool(dc, path.as_deref()).await
    }

    /// Host `host_name` inside the cluster that owns `pool`.
    pub async fn resolve_host(
        &self,
        dc: &DatacenterHandle,
        folders: &DatacenterFolders,
        pool: &ResourcePoolHandle,
        host_name: &str,
    ) -> FleetResult<HostHandle> {
        if host_name.is_empty() {
            return Err(FleetError::InputValidationFailed("host name is empty".to_string()));
        }
        let cluster = cluster_segment(&folders.host_folder, pool)?;
        let path = format!("{}/{}/{}", folders.host_folder.inventory_path, cluster, host_name);

        let _serial = self.serialize().await;
        self.api().find_host(dc, &path).await
    }

    /// Datastore by name, falling back to a storage-pod recommendation when
    /// the name identifies a datastore cluster.
    pub async fn resolve_datastore(
        &self,
        dc: &DatacenterHandle,
        folders: &DatacenterFolders,
        name: &str,
        template: &VmHandle,
        pool: &ResourcePoolHandle,
    ) -> FleetResult<DatastoreHandle> {
        if name.is_empty() {
            return Err(FleetError::InputValidationFailed(
                "no datastore declared for the instance".to_string(),
            ));
        }

        let direct = {
            let _serial = self.serialize().await;
            self.api().find_datastore(dc, name).await
        };
        match direct {
            Ok(datastore) => return Ok(datastore),
            Err(FleetError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let child = {
            let _serial = self.serialize().await;
            self.api().find_child(&folders.datastore_folder, name).await?
        }
        .ok_or_else(|| FleetError::NotFound(format!("datastore '{}'", name)))?;

        match child.kind {
            ObjectKind::Datastore => Ok(DatastoreHandle::new(
                child,
                format!("{}/{}", folders.datastore_folder.inventory_path, name),
            )),
            ObjectKind::StoragePod => {
                tracing::debug!(storage_pod = %name, "Datastore name is a storage pod, requesting placement");
                self.recommend_datastore(folders, name, child, template, pool)
                    .await
            }
            other => Err(FleetError::NotFound(format!(
                "datastore '{}' (found a {:?} instead)",
                name, other
            ))),
        }
    }

    async fn recommend_datastore(
        &self,
        folders: &DatacenterFolders,
        pod_name: &str,
        pod: ManagedObjectRef,
        template: &VmHandle,
        pool: &ResourcePoolHandle,
    ) -> FleetResult<DatastoreHandle> {
        let template_datastore = {
            let _serial = self.serialize().await;
            self.api().vm_datastores(template).await?
        }
        .into_iter()
        .next()
        .ok_or_else(|| {
            FleetError::NotFound(format!("datastore of template '{}'", template.inventory_path))
        })?;
        let disk_key = self.template_disk_key(template).await?;

        let spec = builders::build_clone_placement_spec(
            &folders.vm_folder,
            template,
            template_datastore,
            disk_key,
            pool,
            pod,
        );
        let recommendations = {
            let _serial = self.serialize().await;
            self.api().recommend_datastores(&spec).await?
        };

        let action = recommendations
            .into_iter()
            .next()
            .and_then(|r| r.actions.into_iter().next())
            .ok_or_else(|| {
                FleetError::NoPlacementRecommendation(format!(
                    "storage pod '{}' returned no recommendation",
                    pod_name
                ))
            })?;

        match action {
            PlacementAction::Storage { destination } => {
                tracing::debug!(storage_pod = %pod_name, datastore = %destination, "Storage pod recommended datastore");
                let path = format!(
                    "{}/{}/{}",
                    folders.datastore_folder.inventory_path, pod_name, destination.value
                );
                Ok(DatastoreHandle::new(destination, path))
            }
            PlacementAction::Other { description } => Err(FleetError::NoPlacementRecommendation(
                format!(
                    "storage pod '{}' recommended a non-placement action: {}",
                    pod_name, description
                ),
            )),
        }
    }

    /// Folder `<dc>/vm/<relative>`, or the datacenter's VM folder.
    ///
    /// An explicit folder that can't be resolved is logged and replaced by
    /// the VM folder; it never fails the instance.
    pub async fn resolve_folder(
        &self,
        dc: &DatacenterHandle,
        folders: &DatacenterFolders,
        relative: Option<&str>,
    ) -> FolderHandle {
        let Some(relative) = relative.filter(|r| !r.is_empty()) else {
            return folders.vm_folder.clone();
        };

        let path = format!("{}/vm/{}", dc.name(), relative);
        let found = {
            let _serial = self.serialize().await;
            self.api().find_by_inventory_path(&path).await
        };

        match found {
            Ok(Some(reference)) if reference.kind == ObjectKind::Folder => FolderHandle::new(
                reference,
                format!("{}/{}", folders.vm_folder.inventory_path, relative),
            ),
            Ok(Some(reference)) => {
                tracing::warn!(folder = %relative, found = %reference, "Folder path is not a folder, using VM folder");
                folders.vm_folder.clone()
            }
            Ok(None) => {
                tracing::warn!(folder = %relative, "Cannot find folder, using VM folder");
                folders.vm_folder.clone()
            }
            Err(e) => {
                tracing::warn!(folder = %relative, error = %e, "Error reading folder, using VM folder");
                folders.vm_folder.clone()
            }
        }
    }

    // ========================================================================
    // SPECS
    // ========================================================================

    /// Key of the template disk the relocate spec addresses.
    pub async fn template_disk_key(&self, template: &VmHandle) -> FleetResult<i32> {
        let devices = {
            let _serial = self.serialize().await;
            self.api().devices(template).await?
        };
        builders::template_disk_key(&devices).ok_or_else(|| {
            FleetError::NotFound(format!("virtual disk on template '{}'", template.inventory_path))
        })
    }

    /// NIC spec on the network named `label` (default network when empty).
    pub async fn build_network_device(
        &self,
        dc: &DatacenterHandle,
        label: Option<&str>,
        adapter: &str,
    ) -> FleetResult<NetworkDeviceSpec> {
        let adapter: AdapterType = adapter.parse()?;
        let backing = {
            let _serial = self.serialize().await;
            self.api()
                .network_backing(dc, label.filter(|l| !l.is_empty()))
                .await?
        };
        Ok(builders::build_network_device(backing, adapter))
    }

    pub async fn guest_id(&self, vm: &VmHandle) -> FleetResult<Option<String>> {
        let _serial = self.serialize().await;
        self.api().guest_id(vm).await
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    pub async fn clone_vm(
        &self,
        template: &VmHandle,
        folder: &FolderHandle,
        name: &str,
        spec: &CloneSpec,
    ) -> FleetResult<TaskHandle> {
        let _serial = self.serialize().await;
        self.api().clone_vm(template, folder, name, spec).await
    }

    /// Wait for a clone task and return the new VM.
    pub async fn await_clone(
        &self,
        task: &TaskHandle,
        folder: &FolderHandle,
        name: &str,
    ) -> FleetResult<VmHandle> {
        let result = {
            let _serial = self.serialize().await;
            self.api().wait_for_task(task).await?
        };
        let reference = result.ok_or_else(|| {
            FleetError::TaskFailed(format!("{} returned no virtual machine", task.description))
        })?;
        if reference.kind != ObjectKind::VirtualMachine {
            return Err(FleetError::TaskFailed(format!(
                "{} returned {} instead of a virtual machine",
                task.description, reference
            )));
        }
        Ok(VmHandle::new(
            reference,
            format!("{}/{}", folder.inventory_path, name),
        ))
    }

    /// Replace every ethernet device on `vm` with `desired`.
    ///
    /// Full replace: the clone inherits the template's NICs plus the ones the
    /// clone spec added, none of which are kept.
    pub async fn reconcile_network_devices(
        &self,
        vm: &VmHandle,
        desired: &[NetworkDeviceSpec],
    ) -> FleetResult<ReconcileSummary> {
        let devices = {
            let _serial = self.serialize().await;
            self.api().devices(vm).await?
        };

        let mut summary = ReconcileSummary::default();
        for device in devices.iter().filter(|d| d.is_ethernet()) {
            let _serial = self.serialize().await;
            self.api().remove_device(vm, device).await?;
            summary.removed += 1;
        }
        for spec in desired {
            let _serial = self.serialize().await;
            self.api().add_device(vm, &spec.device).await?;
            summary.added += 1;
        }

        tracing::debug!(
            vm = %vm.inventory_path,
            removed = summary.removed,
            added = summary.added,
            "Reconciled network devices"
        );
        Ok(summary)
    }

    /// Add a disk on the VM's SCSI controller.
    pub async fn add_hard_disk(
        &self,
        vm: &VmHandle,
        datastore: &DatastoreHandle,
        size_gb: u64,
        iops_limit: Option<i64>,
        provisioning: ProvisioningType,
    ) -> FleetResult<()> {
        let devices = {
            let _serial = self.serialize().await;
            self.api().devices(vm).await?
        };
        let controller_key = devices
            .iter()
            .find_map(|d| match d {
                VirtualDevice::ScsiController { key } => Some(*key),
                _ => None,
            })
            .ok_or_else(|| {
                FleetError::NotFound(format!("scsi controller on '{}'", vm.inventory_path))
            })?;

        let disk = builders::build_hard_disk(controller_key, datastore, size_gb, iops_limit, provisioning);
        let _serial = self.serialize().await;
        self.api().add_device(vm, &disk).await
    }

    /// Submit power-on without waiting for the guest.
    ///
    /// Only a submission error is returned; the task's own outcome is
    /// logged from a detached task.
    pub async fn power_on(&self, vm: &VmHandle) -> FleetResult<()> {
        let task = {
            let _serial = self.serialize().await;
            self.api().power_on(vm).await?
        };

        let client = self.clone();
        let vm_path = vm.inventory_path.clone();
        tokio::spawn(async move {
            let result = {
                let _serial = client.serialize().await;
                client.api().wait_for_task(&task).await
            };
            if let Err(e) = result {
                tracing::warn!(vm = %vm_path, error = %e, "Power-on task failed");
            }
        });
        Ok(())
    }

    // ========================================================================
    // GUEST
    // ========================================================================

    pub async fn wait_for_power_on(&self, vm: &VmHandle, policy: PollPolicy) -> FleetResult<()> {
        poll_until(policy, "power state poweredOn", || async move {
            let _serial = self.serialize().await;
            let state = self.api().power_state(vm).await?;
            Ok((state == PowerState::PoweredOn).then_some(()))
        })
        .await
    }

    pub async fn wait_for_tools_running(&self, vm: &VmHandle, policy: PollPolicy) -> FleetResult<()> {
        poll_until(policy, "guest tools running", || async move {
            let _serial = self.serialize().await;
            let running = self.api().is_tools_running(vm).await?;
            Ok(running.then_some(()))
        })
        .await
    }

    pub async fn run_guest_program(
        &self,
        vm: &VmHandle,
        auth: &GuestAuth,
        spec: &GuestProgramSpec,
    ) -> FleetResult<i64> {
        let _serial = self.serialize().await;
        self.api().start_program(vm, auth, spec).await
    }

    pub async fn reboot_guest(&self, vm: &VmHandle) -> FleetResult<()> {
        let _serial = self.serialize().await;
        self.api().reboot_guest(vm).await
    }

    pub async fn wait_for_guest_ip(&self, vm: &VmHandle, policy: PollPolicy) -> FleetResult<IpAddr> {
        poll_until(policy, "guest ip address", || async move {
            let _serial = self.serialize().await;
            self.api().guest_ip(vm).await
        })
        .await
    }
}

/// Cluster segment of a resource pool path, relative to the host folder.
///
/// `/dc1/host/cluster1/Resources/web` → `cluster1`.
fn cluster_segment<'a>(host_folder: &FolderHandle, pool: &'a ResourcePoolHandle) -> FleetResult<&'a str> {
    let prefix = format!("{}/", host_folder.inventory_path);
    let segment = match pool.inventory_path.strip_prefix(&prefix) {
        Some(rest) => rest.split('/').next(),
        None => pool.inventory_path.split('/').nth(3),
    };

    segment.filter(|s| !s.is_empty()).ok_or_else(|| {
        FleetError::NotFound(format!(
            "cluster of resource pool '{}'",
            pool.inventory_path
        ))
    })
}

/// Probe until it yields a value, at most `policy.max_attempts` times.
async fn poll_until<T, F, Fut>(policy: PollPolicy, what: &str, mut probe: F) -> FleetResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FleetResult<Option<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = probe().await? {
            tracing::debug!(attempt, "{} reached", what);
            return Ok(value);
        }
        tracing::trace!(attempt, max_attempts = policy.max_attempts, "Waiting for {}", what);
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(FleetError::Timeout(format!(
        "{} not reached after {} attempts",
        what, policy.max_attempts
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn folder(path: &str) -> FolderHandle {
        FolderHandle::new(ManagedObjectRef::new(ObjectKind::Folder, "group-h4"), path)
    }

    fn pool(path: &str) -> ResourcePoolHandle {
        ResourcePoolHandle::new(ManagedObjectRef::new(ObjectKind::ResourcePool, "resgroup-8"), path)
    }

    #[test]
    fn test_cluster_segment_from_pool_path() {
        let host_folder = folder("/dc1/host");
        assert_eq!(
            cluster_segment(&host_folder, &pool("/dc1/host/cluster1/Resources")).unwrap(),
            "cluster1"
        );
        assert_eq!(
            cluster_segment(&host_folder, &pool("/dc1/host/cluster1/Resources/web")).unwrap(),
            "cluster1"
        );
    }

    #[test]
    fn test_cluster_segment_short_path_is_not_found() {
        let err = cluster_segment(&folder("/other/host"), &pool("/dc1")).unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_poll_until_times_out_after_exact_attempts() {
        let probes = AtomicU32::new(0);
        let counter = &probes;
        let policy = PollPolicy::new(Duration::from_millis(1), 10);

        let err = poll_until(policy, "never", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<()>, FleetError>(None)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, FleetError::Timeout(_)));
        assert_eq!(probes.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_poll_until_returns_first_value() {
        let probes = AtomicU32::new(0);
        let counter = &probes;
        let policy = PollPolicy::new(Duration::from_millis(1), 30);

        let value = poll_until(policy, "third probe", || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok::<Option<u32>, FleetError>((n == 3).then_some(n))
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_propagates_probe_error() {
        let policy = PollPolicy::new(Duration::from_millis(1), 5);
        let err = poll_until(policy, "broken", || async {
            Err::<Option<()>, FleetError>(FleetError::PlatformRequestFailed("session lost".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FleetError::PlatformRequestFailed(_)));
    }
}
