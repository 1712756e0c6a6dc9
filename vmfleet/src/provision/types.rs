//! Type definitions for the provisioning pipeline.

use crate::config::FleetConfig;
use crate::platform::{
    DatacenterFolders, DatacenterHandle, DatastoreHandle, FolderHandle, HostHandle,
    IpCustomization, NetworkDeviceSpec, PlatformClient, RelocateSpec, ResourcePoolHandle,
    TaskHandle, VmHandle,
};
use crate::spec::InstanceSpec;
use std::net::IpAddr;
use std::sync::Arc;

/// Device spec and IP settings built for one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicPlan {
    pub device: NetworkDeviceSpec,
    pub ip: IpCustomization,
}

/// Working state of one instance's pipeline.
///
/// Owned by a single provisioner; each task fills in the outputs the later
/// tasks consume. Dropped when the pipeline ends.
pub struct ProvisionContext {
    pub spec: Arc<InstanceSpec>,
    pub client: PlatformClient,
    pub config: Arc<FleetConfig>,

    // === ResolvingPlacement ===
    pub datacenter: Option<DatacenterHandle>,
    pub folders: Option<DatacenterFolders>,
    pub template: Option<VmHandle>,
    pub resource_pool: Option<ResourcePoolHandle>,
    pub folder: Option<FolderHandle>,
    pub host: Option<HostHandle>,
    pub datastore: Option<DatastoreHandle>,

    // === Spec building ===
    pub relocate: Option<RelocateSpec>,
    pub nics: Option<Vec<NicPlan>>,

    // === Clone and guest ===
    pub clone_task: Option<TaskHandle>,
    pub vm: Option<VmHandle>,
    pub guest_ip: Option<IpAddr>,
}

impl ProvisionContext {
    pub fn new(spec: Arc<InstanceSpec>, client: PlatformClient, config: Arc<FleetConfig>) -> Self {
        Self {
            spec,
            client,
            config,
            datacenter: None,
            folders: None,
            template: None,
            resource_pool: None,
            folder: None,
            host: None,
            datastore: None,
            relocate: None,
            nics: None,
            clone_task: None,
            vm: None,
            guest_ip: None,
        }
    }
}
