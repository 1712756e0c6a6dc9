//! PlatformApi - primitive operations a platform binding must provide.

use super::types::{
    CloneSpec, DatacenterFolders, DatacenterHandle, DatastoreHandle, FolderHandle, GuestAuth,
    GuestProgramSpec, HostHandle, ManagedObjectRef, NetworkBacking, PowerState,
    ResourcePoolHandle, StoragePlacementRecommendation, StoragePlacementSpec, TaskHandle,
    VirtualDevice, VmHandle,
};
use async_trait::async_trait;
use std::net::IpAddr;
use vmfleet_shared::FleetResult;

/// Trait for the primitive calls of one platform session.
///
/// Each method maps onto a single platform request. Defaults, fallbacks,
/// polling and multi-call sequences live in [`super::PlatformClient`], so a
/// binding only translates requests and errors.
///
/// Lookups report a missing object as `FleetError::NotFound` and a lookup
/// that matched several objects as `FleetError::AmbiguousReference`; every
/// other failure is `FleetError::PlatformRequestFailed`.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Look up a datacenter by name, or the platform's default one.
    async fn find_datacenter(&self, name: Option<&str>) -> FleetResult<DatacenterHandle>;

    async fn datacenter_folders(&self, dc: &DatacenterHandle) -> FleetResult<DatacenterFolders>;

    /// Look up a virtual machine (or template) by path relative to the
    /// datacenter's VM folder.
    async fn find_virtual_machine(&self, dc: &DatacenterHandle, path: &str) -> FleetResult<VmHandle>;

    /// Look up a resource pool by path, or the default pool when `None`.
    ///
    /// A leading `*` matches any inventory path ending with the rest.
    async fn find_resource_pool(
        &self,
        dc: &DatacenterHandle,
        path: Option<&str>,
    ) -> FleetResult<ResourcePoolHandle>;

    /// Look up a host by full inventory path.
    async fn find_host(&self, dc: &DatacenterHandle, path: &str) -> FleetResult<HostHandle>;

    /// Look up a plain datastore by name.
    async fn find_datastore(&self, dc: &DatacenterHandle, name: &str) -> FleetResult<DatastoreHandle>;

    /// Search a folder's direct children by name, whatever their kind.
    async fn find_child(
        &self,
        folder: &FolderHandle,
        name: &str,
    ) -> FleetResult<Option<ManagedObjectRef>>;

    async fn find_by_inventory_path(&self, path: &str) -> FleetResult<Option<ManagedObjectRef>>;

    async fn recommend_datastores(
        &self,
        spec: &StoragePlacementSpec,
    ) -> FleetResult<Vec<StoragePlacementRecommendation>>;

    /// Datastores currently holding the VM's files.
    async fn vm_datastores(&self, vm: &VmHandle) -> FleetResult<Vec<ManagedObjectRef>>;

    async fn devices(&self, vm: &VmHandle) -> FleetResult<Vec<VirtualDevice>>;

    /// Guest OS identifier reported for the VM, if any.
    async fn guest_id(&self, vm: &VmHandle) -> FleetResult<Option<String>>;

    /// Backing for a NIC on the named network, or the default network.
    async fn network_backing(
        &self,
        dc: &DatacenterHandle,
        label: Option<&str>,
    ) -> FleetResult<NetworkBacking>;

    async fn clone_vm(
        &self,
        template: &VmHandle,
        folder: &FolderHandle,
        name: &str,
        spec: &CloneSpec,
    ) -> FleetResult<TaskHandle>;

    /// Block until the task finishes. Returns the task's result object.
    ///
    /// A task that ends in error is `FleetError::TaskFailed`.
    async fn wait_for_task(&self, task: &TaskHandle) -> FleetResult<Option<ManagedObjectRef>>;

    async fn remove_device(&self, vm: &VmHandle, device: &VirtualDevice) -> FleetResult<()>;

    async fn add_device(&self, vm: &VmHandle, device: &VirtualDevice) -> FleetResult<()>;

    /// Submit a power-on task without waiting for it.
    async fn power_on(&self, vm: &VmHandle) -> FleetResult<TaskHandle>;

    async fn power_state(&self, vm: &VmHandle) -> FleetResult<PowerState>;

    async fn is_tools_running(&self, vm: &VmHandle) -> FleetResult<bool>;

    /// Start a program in the guest. Returns the guest process id.
    async fn start_program(
        &self,
        vm: &VmHandle,
        auth: &GuestAuth,
        spec: &GuestProgramSpec,
    ) -> FleetResult<i64>;

    async fn reboot_guest(&self, vm: &VmHandle) -> FleetResult<()>;

    /// Address the guest currently reports, if any.
    async fn guest_ip(&self, vm: &VmHandle) -> FleetResult<Option<IpAddr>>;

    /// Whether independent pipelines may issue requests concurrently.
    ///
    /// Bindings whose transport cannot multiplex requests return `false`
    /// and the client serializes every call.
    fn supports_concurrent_requests(&self) -> bool {
        true
    }
}
