//! In-memory platform backend.
//!
//! `SimulatedPlatform` implements [`PlatformApi`] over an inventory loaded
//! from JSON. It is the binding the `vmfleet` binary drives and the double
//! the tests provision against. Every mutation and poll is recorded in a
//! [`Journal`] so callers can assert what was (or wasn't) asked of the
//! platform.
//!
//! Inventory paths follow the usual layout:
//! - `/<dc>/vm/<folder>/<vm>`
//! - `/<dc>/host/<cluster>/Resources[/<pool>]`
//! - `/<dc>/host/<cluster>/<host>`
//! - `/<dc>/datastore/<datastore or pod>[/<pod member>]`
//! - `/<dc>/network/<network>`

use super::api::PlatformApi;
use super::types::{
    CloneSpec, ConnectionParams, DatacenterFolders, DatacenterHandle, DatastoreHandle,
    DiskBacking, FolderHandle, GuestAuth, GuestProgramSpec, HostHandle, ManagedObjectRef,
    MacAddressType, NetworkBacking, ObjectKind, PlacementAction, PowerState, ProvisioningType,
    ResourcePoolHandle, StoragePlacementRecommendation, StoragePlacementSpec, TaskHandle,
    VirtualDevice, VmHandle,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use vmfleet_shared::{FleetError, FleetResult};

// ============================================================================
// INVENTORY
// ============================================================================

/// Inventory description, usually loaded from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub datacenters: Vec<DatacenterInventory>,
    pub guest: GuestBehaviour,
    /// Credentials the session accepts. Any are accepted when unset.
    pub credentials: Option<InventoryCredentials>,
    /// Report that requests must not be issued concurrently.
    pub serial_only: bool,
    /// Clone names whose clone task ends in error.
    pub fail_clone: Vec<String>,
}

impl Inventory {
    pub fn from_json(json: &str) -> FleetResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> FleetResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatacenterInventory {
    pub name: String,
    pub clusters: Vec<ClusterInventory>,
    pub datastores: Vec<String>,
    pub storage_pods: Vec<StoragePodInventory>,
    /// Folder paths relative to the VM folder, e.g. `web/frontend`.
    pub folders: Vec<String>,
    /// The first network is the default one.
    pub networks: Vec<String>,
    pub templates: Vec<TemplateInventory>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterInventory {
    pub name: String,
    pub hosts: Vec<String>,
    /// Child pools below the cluster's root pool.
    pub resource_pools: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoragePodInventory {
    pub name: String,
    /// Member datastores.
    pub datastores: Vec<String>,
    /// Datastores recommended for a clone, in order. Empty means the pod
    /// returns no recommendation.
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateInventory {
    /// Path relative to the VM folder.
    pub path: String,
    pub datastore: String,
    #[serde(default)]
    pub guest_id: Option<String>,
    #[serde(default = "default_template_devices")]
    pub devices: Vec<VirtualDevice>,
    /// Address the template's interface file is configured with.
    #[serde(default = "default_template_address")]
    pub address: Ipv4Addr,
}

fn default_template_devices() -> Vec<VirtualDevice> {
    vec![
        VirtualDevice::ScsiController { key: 1000 },
        VirtualDevice::Disk {
            key: 2000,
            controller_key: 1000,
            capacity_kb: 16 * 1024 * 1024,
            iops_limit: None,
            backing: DiskBacking::for_provisioning(ProvisioningType::Thin, None),
        },
        VirtualDevice::Ethernet {
            key: 4000,
            adapter: Default::default(),
            backing: NetworkBacking {
                device_name: "VM Network".to_string(),
            },
            address_type: MacAddressType::Assigned,
        },
    ]
}

fn default_template_address() -> Ipv4Addr {
    Ipv4Addr::new(10, 10, 10, 10)
}

/// How simulated guests behave once powered on.
///
/// Each `*_after_polls` value is the probe on which the condition is first
/// observed; `null` means it never is.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuestBehaviour {
    pub power_on_after_polls: Option<u32>,
    pub tools_after_polls: Option<u32>,
    pub ip_after_polls: Option<u32>,
    /// Credentials the guest agent accepts. Any are accepted when unset.
    pub auth: Option<GuestAuth>,
}

impl Default for GuestBehaviour {
    fn default() -> Self {
        Self {
            power_on_after_polls: Some(1),
            tools_after_polls: Some(1),
            ip_after_polls: Some(1),
            auth: None,
        }
    }
}

// ============================================================================
// JOURNAL
// ============================================================================

/// A clone request as the platform received it.
#[derive(Debug, Clone)]
pub struct CloneRecord {
    pub name: String,
    pub template: String,
    pub folder: String,
    pub spec: CloneSpec,
}

#[derive(Debug, Clone)]
pub struct ProgramRecord {
    pub vm: String,
    pub spec: GuestProgramSpec,
}

/// Everything the simulated platform was asked to do.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    pub clones: Vec<CloneRecord>,
    /// Storage pod names placement was requested for.
    pub placements: Vec<String>,
    pub programs: Vec<ProgramRecord>,
    /// VM names, one entry per reboot.
    pub reboots: Vec<String>,
    /// VM names, one entry per power-on submission.
    pub power_ons: Vec<String>,
    pub power_polls: HashMap<String, u32>,
    pub tools_polls: HashMap<String, u32>,
    pub ip_polls: HashMap<String, u32>,
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone)]
struct SimObject {
    reference: ManagedObjectRef,
    path: String,
}

#[derive(Debug, Clone)]
struct SimVm {
    name: String,
    datastore: ManagedObjectRef,
    guest_id: Option<String>,
    devices: Vec<VirtualDevice>,
    powered: bool,
    /// Address the guest reports.
    address: Ipv4Addr,
    /// Address written to the interface file, applied on reboot.
    configured: Ipv4Addr,
}

#[derive(Debug, Clone)]
enum SimTask {
    Clone(Result<ManagedObjectRef, String>),
    PowerOn,
}

#[derive(Debug)]
struct SimState {
    next_id: u64,
    objects: Vec<SimObject>,
    networks: HashMap<String, Vec<String>>,
    pod_recommendations: HashMap<String, Vec<String>>,
    vms: HashMap<String, SimVm>,
    tasks: HashMap<String, SimTask>,
    journal: Journal,
}

impl SimState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn register(&mut self, kind: ObjectKind, prefix: &str, path: String) -> ManagedObjectRef {
        let reference = ManagedObjectRef::new(kind, self.allocate(prefix));
        self.objects.push(SimObject {
            reference: reference.clone(),
            path,
        });
        reference
    }

    fn by_path(&self, path: &str) -> Option<&SimObject> {
        self.objects.iter().find(|o| o.path == path)
    }

    fn lookup(&self, kind: ObjectKind, path: &str) -> FleetResult<&SimObject> {
        self.by_path(path)
            .filter(|o| o.reference.kind == kind)
            .ok_or_else(|| FleetError::NotFound(format!("{:?} '{}'", kind, path)))
    }

    fn path_of(&self, reference: &ManagedObjectRef) -> FleetResult<&str> {
        self.objects
            .iter()
            .find(|o| &o.reference == reference)
            .map(|o| o.path.as_str())
            .ok_or_else(|| unknown(reference))
    }

    fn vm(&self, vm: &VmHandle) -> FleetResult<&SimVm> {
        self.vms.get(&vm.reference.value).ok_or_else(|| unknown(&vm.reference))
    }

    fn vm_mut(&mut self, vm: &VmHandle) -> FleetResult<&mut SimVm> {
        self.vms
            .get_mut(&vm.reference.value)
            .ok_or_else(|| unknown(&vm.reference))
    }

    /// Exactly one match, or NotFound / AmbiguousReference.
    fn single<'a>(
        &'a self,
        what: &str,
        mut candidates: impl Iterator<Item = &'a SimObject>,
    ) -> FleetResult<&'a SimObject> {
        let first = candidates
            .next()
            .ok_or_else(|| FleetError::NotFound(what.to_string()))?;
        let others = candidates.count();
        if others > 0 {
            return Err(FleetError::AmbiguousReference(format!(
                "{} matches {} objects",
                what,
                others + 1
            )));
        }
        Ok(first)
    }
}

fn unknown(reference: &ManagedObjectRef) -> FleetError {
    FleetError::PlatformRequestFailed(format!("unknown managed object {}", reference))
}

fn absolute(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Replacement address of a `sed -i 's/<old>/<new>/g' <file>` rewrite.
fn rewritten_address(arguments: &str) -> Option<Ipv4Addr> {
    let expression = arguments.split_once("s/")?.1;
    let mut parts = expression.split('/');
    parts.next()?;
    parts.next()?.parse().ok()
}

// ============================================================================
// PLATFORM
// ============================================================================

pub struct SimulatedPlatform {
    guest: GuestBehaviour,
    fail_clone: Vec<String>,
    serial_only: bool,
    state: Mutex<SimState>,
}

impl std::fmt::Debug for SimulatedPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPlatform")
            .field("serial_only", &self.serial_only)
            .finish()
    }
}

impl SimulatedPlatform {
    /// Open a session on `inventory` with `params`.
    pub fn connect(params: &ConnectionParams, inventory: Inventory) -> FleetResult<Self> {
        if let Some(expected) = &inventory.credentials
            && (expected.username != params.username || expected.password != params.password)
        {
            return Err(FleetError::PlatformRequestFailed(format!(
                "login to {} failed for user '{}'",
                params.server, params.username
            )));
        }

        tracing::debug!(server = %params.server, user = %params.username, "Connected to simulated platform");
        Ok(Self::new(inventory))
    }

    pub fn new(inventory: Inventory) -> Self {
        let mut state = SimState {
            next_id: 0,
            objects: Vec::new(),
            networks: HashMap::new(),
            pod_recommendations: HashMap::new(),
            vms: HashMap::new(),
            tasks: HashMap::new(),
            journal: Journal::default(),
        };

        for dc in &inventory.datacenters {
            let root = format!("/{}", dc.name);
            state.register(ObjectKind::Datacenter, "datacenter", root.clone());
            for folder in ["vm", "host", "datastore", "network"] {
                state.register(ObjectKind::Folder, "group", format!("{}/{}", root, folder));
            }

            for folder in &dc.folders {
                let mut path = format!("{}/vm", root);
                for segment in folder.split('/').filter(|s| !s.is_empty()) {
                    path = format!("{}/{}", path, segment);
                    if state.by_path(&path).is_none() {
                        state.register(ObjectKind::Folder, "group", path.clone());
                    }
                }
            }

            for cluster in &dc.clusters {
                let cluster_path = format!("{}/host/{}", root, cluster.name);
                let root_pool = format!("{}/Resources", cluster_path);
                state.register(ObjectKind::ResourcePool, "resgroup", root_pool.clone());
                for pool in &cluster.resource_pools {
                    state.register(
                        ObjectKind::ResourcePool,
                        "resgroup",
                        format!("{}/{}", root_pool, pool),
                    );
                }
                for host in &cluster.hosts {
                    state.register(
                        ObjectKind::HostSystem,
                        "host",
                        format!("{}/{}", cluster_path, host),
                    );
                }
            }

            for datastore in &dc.datastores {
                state.register(
                    ObjectKind::Datastore,
                    "datastore",
                    format!("{}/datastore/{}", root, datastore),
                );
            }
            for pod in &dc.storage_pods {
                let pod_path = format!("{}/datastore/{}", root, pod.name);
                let pod_ref = state.register(ObjectKind::StoragePod, "group-p", pod_path.clone());
                for member in &pod.datastores {
                    state.register(
                        ObjectKind::Datastore,
                        "datastore",
                        format!("{}/{}", pod_path, member),
                    );
                }
                state
                    .pod_recommendations
                    .insert(pod_ref.value, pod.recommendations.clone());
            }

            for network in &dc.networks {
                state.register(
                    ObjectKind::Network,
                    "network",
                    format!("{}/network/{}", root, network),
                );
            }
            state.networks.insert(root.clone(), dc.networks.clone());

            for template in &dc.templates {
                let datastore = state
                    .by_path(&format!("{}/datastore/{}", root, template.datastore))
                    .map(|o| o.reference.clone())
                    .unwrap_or_else(|| ManagedObjectRef::new(ObjectKind::Datastore, &template.datastore));
                let path = format!("{}/vm/{}", root, template.path);
                let reference = state.register(ObjectKind::VirtualMachine, "vm", path.clone());
                let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                state.vms.insert(
                    reference.value,
                    SimVm {
                        name,
                        datastore,
                        guest_id: template.guest_id.clone(),
                        devices: template.devices.clone(),
                        powered: false,
                        address: template.address,
                        configured: template.address,
                    },
                );
            }
        }

        Self {
            guest: inventory.guest,
            fail_clone: inventory.fail_clone,
            serial_only: inventory.serial_only,
            state: Mutex::new(state),
        }
    }

    /// Snapshot of every request recorded so far.
    pub fn journal(&self) -> Journal {
        self.state.lock().journal.clone()
    }

    /// Devices of the VM named `name`, if it exists.
    pub fn vm_devices(&self, name: &str) -> Option<Vec<VirtualDevice>> {
        let state = self.state.lock();
        state
            .vms
            .values()
            .find(|vm| vm.name == name)
            .map(|vm| vm.devices.clone())
    }

    /// Address the guest of VM `name` currently reports.
    pub fn vm_address(&self, name: &str) -> Option<Ipv4Addr> {
        let state = self.state.lock();
        state.vms.values().find(|vm| vm.name == name).map(|vm| vm.address)
    }

    fn poll(counter: &mut HashMap<String, u32>, vm: &str) -> u32 {
        let polls = counter.entry(vm.to_string()).or_default();
        *polls += 1;
        *polls
    }

    fn reached(after: Option<u32>, polls: u32) -> bool {
        after.is_some_and(|after| polls >= after)
    }
}

#[async_trait]
impl PlatformApi for SimulatedPlatform {
    async fn find_datacenter(&self, name: Option<&str>) -> FleetResult<DatacenterHandle> {
        let state = self.state.lock();
        let object = match name {
            Some(name) => state.lookup(ObjectKind::Datacenter, &absolute(name))?,
            None => state.single(
                "default datacenter",
                state
                    .objects
                    .iter()
                    .filter(|o| o.reference.kind == ObjectKind::Datacenter),
            )?,
        };
        Ok(DatacenterHandle::new(object.reference.clone(), &object.path))
    }

    async fn datacenter_folders(&self, dc: &DatacenterHandle) -> FleetResult<DatacenterFolders> {
        let state = self.state.lock();
        let folder = |name: &str| -> FleetResult<FolderHandle> {
            let object = state.lookup(ObjectKind::Folder, &format!("{}/{}", dc.inventory_path, name))?;
            Ok(FolderHandle::new(object.reference.clone(), &object.path))
        };
        Ok(DatacenterFolders {
            vm_folder: folder("vm")?,
            host_folder: folder("host")?,
            datastore_folder: folder("datastore")?,
        })
    }

    async fn find_virtual_machine(&self, dc: &DatacenterHandle, path: &str) -> FleetResult<VmHandle> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/vm/{}", dc.inventory_path, path)
        };
        let state = self.state.lock();
        let object = state.lookup(ObjectKind::VirtualMachine, &path)?;
        Ok(VmHandle::new(object.reference.clone(), &object.path))
    }

    async fn find_resource_pool(
        &self,
        dc: &DatacenterHandle,
        path: Option<&str>,
    ) -> FleetResult<ResourcePoolHandle> {
        let state = self.state.lock();
        let host_root = format!("{}/host/", dc.inventory_path);
        let pools = state.objects.iter().filter(|o| {
            o.reference.kind == ObjectKind::ResourcePool && o.path.starts_with(&host_root)
        });

        let object = match path {
            None => state.single(
                "default resource pool",
                pools.filter(|o| o.path.ends_with("/Resources")),
            )?,
            Some(pattern) if pattern.starts_with('*') => {
                let suffix = &pattern[1..];
                state.single(
                    &format!("resource pool '{}'", pattern),
                    pools.filter(|o| o.path.ends_with(suffix)),
                )?
            }
            Some(path) if path.starts_with('/') => state.lookup(ObjectKind::ResourcePool, path)?,
            Some(path) => state.lookup(ObjectKind::ResourcePool, &format!("{}{}", host_root, path))?,
        };
        Ok(ResourcePoolHandle::new(object.reference.clone(), &object.path))
    }

    async fn find_host(&self, _dc: &DatacenterHandle, path: &str) -> FleetResult<HostHandle> {
        let state = self.state.lock();
        let object = state.lookup(ObjectKind::HostSystem, path)?;
        Ok(HostHandle::new(object.reference.clone(), &object.path))
    }

    async fn find_datastore(&self, dc: &DatacenterHandle, name: &str) -> FleetResult<DatastoreHandle> {
        let state = self.state.lock();
        let object = state.lookup(
            ObjectKind::Datastore,
            &format!("{}/datastore/{}", dc.inventory_path, name),
        )?;
        Ok(DatastoreHandle::new(object.reference.clone(), &object.path))
    }

    async fn find_child(
        &self,
        folder: &FolderHandle,
        name: &str,
    ) -> FleetResult<Option<ManagedObjectRef>> {
        let state = self.state.lock();
        let path = format!("{}/{}", folder.inventory_path, name);
        Ok(state.by_path(&path).map(|o| o.reference.clone()))
    }

    async fn find_by_inventory_path(&self, path: &str) -> FleetResult<Option<ManagedObjectRef>> {
        let state = self.state.lock();
        Ok(state.by_path(&absolute(path)).map(|o| o.reference.clone()))
    }

    async fn recommend_datastores(
        &self,
        spec: &StoragePlacementSpec,
    ) -> FleetResult<Vec<StoragePlacementRecommendation>> {
        let mut state = self.state.lock();
        let pod_path = state.path_of(&spec.storage_pod)?.to_string();
        let names = state
            .pod_recommendations
            .get(&spec.storage_pod.value)
            .cloned()
            .unwrap_or_default();
        state.journal.placements.push(
            pod_path.rsplit('/').next().unwrap_or(&pod_path).to_string(),
        );

        names
            .iter()
            .map(|name| {
                let object = state.lookup(ObjectKind::Datastore, &format!("{}/{}", pod_path, name))?;
                Ok(StoragePlacementRecommendation {
                    actions: vec![PlacementAction::Storage {
                        destination: object.reference.clone(),
                    }],
                })
            })
            .collect()
    }

    async fn vm_datastores(&self, vm: &VmHandle) -> FleetResult<Vec<ManagedObjectRef>> {
        let state = self.state.lock();
        Ok(vec![state.vm(vm)?.datastore.clone()])
    }

    async fn devices(&self, vm: &VmHandle) -> FleetResult<Vec<VirtualDevice>> {
        let state = self.state.lock();
        Ok(state.vm(vm)?.devices.clone())
    }

    async fn guest_id(&self, vm: &VmHandle) -> FleetResult<Option<String>> {
        let state = self.state.lock();
        Ok(state.vm(vm)?.guest_id.clone())
    }

    async fn network_backing(
        &self,
        dc: &DatacenterHandle,
        label: Option<&str>,
    ) -> FleetResult<NetworkBacking> {
        let state = self.state.lock();
        let networks = state
            .networks
            .get(&dc.inventory_path)
            .ok_or_else(|| unknown(&dc.reference))?;
        let device_name = match label {
            Some(label) => networks
                .iter()
                .find(|n| n.as_str() == label)
                .ok_or_else(|| FleetError::NotFound(format!("network '{}'", label)))?,
            None => networks
                .first()
                .ok_or_else(|| FleetError::NotFound("default network".to_string()))?,
        };
        Ok(NetworkBacking {
            device_name: device_name.clone(),
        })
    }

    async fn clone_vm(
        &self,
        template: &VmHandle,
        folder: &FolderHandle,
        name: &str,
        spec: &CloneSpec,
    ) -> FleetResult<TaskHandle> {
        let mut state = self.state.lock();
        let source = state.vm(template)?.clone();
        state.lookup(ObjectKind::Folder, &folder.inventory_path)?;
        state.journal.clones.push(CloneRecord {
            name: name.to_string(),
            template: template.inventory_path.clone(),
            folder: folder.inventory_path.clone(),
            spec: spec.clone(),
        });

        let path = format!("{}/{}", folder.inventory_path, name);
        let result = if self.fail_clone.iter().any(|n| n == name) {
            Err(format!("cannot clone '{}': insufficient resources", name))
        } else if state.by_path(&path).is_some() {
            Err(format!("the name '{}' already exists", name))
        } else {
            let mut devices = source.devices.clone();
            let mut next_key = devices.iter().map(VirtualDevice::key).max().unwrap_or(0);
            for change in spec.config.iter().flat_map(|c| c.device_change.iter()) {
                next_key += 1;
                devices.push(with_key(change.device.clone(), next_key));
            }

            let reference = state.register(ObjectKind::VirtualMachine, "vm", path);
            state.vms.insert(
                reference.value.clone(),
                SimVm {
                    name: name.to_string(),
                    datastore: spec
                        .location
                        .datastore
                        .clone()
                        .unwrap_or(source.datastore),
                    guest_id: source.guest_id,
                    devices,
                    powered: false,
                    address: source.address,
                    configured: source.configured,
                },
            );
            Ok(reference)
        };

        let task = state.allocate("task");
        state.tasks.insert(task.clone(), SimTask::Clone(result));
        Ok(TaskHandle {
            reference: ManagedObjectRef::new(ObjectKind::Task, task),
            description: format!("clone of {} to {}", template.name(), name),
        })
    }

    async fn wait_for_task(&self, task: &TaskHandle) -> FleetResult<Option<ManagedObjectRef>> {
        let state = self.state.lock();
        match state.tasks.get(&task.reference.value) {
            Some(SimTask::Clone(Ok(vm))) => Ok(Some(vm.clone())),
            Some(SimTask::Clone(Err(message))) => Err(FleetError::TaskFailed(message.clone())),
            Some(SimTask::PowerOn) => Ok(None),
            None => Err(unknown(&task.reference)),
        }
    }

    async fn remove_device(&self, vm: &VmHandle, device: &VirtualDevice) -> FleetResult<()> {
        let mut state = self.state.lock();
        let sim_vm = state.vm_mut(vm)?;
        let before = sim_vm.devices.len();
        sim_vm.devices.retain(|d| d.key() != device.key());
        if sim_vm.devices.len() == before {
            return Err(FleetError::PlatformRequestFailed(format!(
                "device {} not found on {}",
                device.key(),
                vm.inventory_path
            )));
        }
        Ok(())
    }

    async fn add_device(&self, vm: &VmHandle, device: &VirtualDevice) -> FleetResult<()> {
        let mut state = self.state.lock();
        let sim_vm = state.vm_mut(vm)?;
        let key = sim_vm.devices.iter().map(VirtualDevice::key).max().unwrap_or(0) + 1;
        sim_vm.devices.push(with_key(device.clone(), key));
        Ok(())
    }

    async fn power_on(&self, vm: &VmHandle) -> FleetResult<TaskHandle> {
        let mut state = self.state.lock();
        let sim_vm = state.vm_mut(vm)?;
        sim_vm.powered = true;
        let name = sim_vm.name.clone();
        state.journal.power_ons.push(name.clone());

        let task = state.allocate("task");
        state.tasks.insert(task.clone(), SimTask::PowerOn);
        Ok(TaskHandle {
            reference: ManagedObjectRef::new(ObjectKind::Task, task),
            description: format!("power on {}", name),
        })
    }

    async fn power_state(&self, vm: &VmHandle) -> FleetResult<PowerState> {
        let mut state = self.state.lock();
        let sim_vm = state.vm(vm)?;
        let (name, powered) = (sim_vm.name.clone(), sim_vm.powered);
        let polls = Self::poll(&mut state.journal.power_polls, &name);

        if powered && Self::reached(self.guest.power_on_after_polls, polls) {
            Ok(PowerState::PoweredOn)
        } else {
            Ok(PowerState::PoweredOff)
        }
    }

    async fn is_tools_running(&self, vm: &VmHandle) -> FleetResult<bool> {
        let mut state = self.state.lock();
        let sim_vm = state.vm(vm)?;
        let (name, powered) = (sim_vm.name.clone(), sim_vm.powered);
        let polls = Self::poll(&mut state.journal.tools_polls, &name);
        Ok(powered && Self::reached(self.guest.tools_after_polls, polls))
    }

    async fn start_program(
        &self,
        vm: &VmHandle,
        auth: &GuestAuth,
        spec: &GuestProgramSpec,
    ) -> FleetResult<i64> {
        let mut state = self.state.lock();
        if let Some(expected) = &self.guest.auth
            && expected != auth
        {
            return Err(FleetError::PlatformRequestFailed(format!(
                "guest authentication failed for user '{}'",
                auth.username
            )));
        }

        let sim_vm = state.vm_mut(vm)?;
        if !sim_vm.powered {
            return Err(FleetError::PlatformRequestFailed(format!(
                "guest operations agent of {} is not running",
                vm.inventory_path
            )));
        }
        if spec.program_path.ends_with("sed")
            && let Some(address) = rewritten_address(&spec.arguments)
        {
            sim_vm.configured = address;
        }
        let name = sim_vm.name.clone();

        state.journal.programs.push(ProgramRecord {
            vm: name,
            spec: spec.clone(),
        });
        Ok(1000 + state.journal.programs.len() as i64)
    }

    async fn reboot_guest(&self, vm: &VmHandle) -> FleetResult<()> {
        let mut state = self.state.lock();
        let sim_vm = state.vm_mut(vm)?;
        sim_vm.address = sim_vm.configured;
        let name = sim_vm.name.clone();
        state.journal.ip_polls.remove(&name);
        state.journal.reboots.push(name);
        Ok(())
    }

    async fn guest_ip(&self, vm: &VmHandle) -> FleetResult<Option<IpAddr>> {
        let mut state = self.state.lock();
        let sim_vm = state.vm(vm)?;
        let (name, powered, address) = (sim_vm.name.clone(), sim_vm.powered, sim_vm.address);
        let polls = Self::poll(&mut state.journal.ip_polls, &name);

        Ok((powered && Self::reached(self.guest.ip_after_polls, polls)).then_some(IpAddr::V4(address)))
    }

    fn supports_concurrent_requests(&self) -> bool {
        !self.serial_only
    }
}

fn with_key(device: VirtualDevice, key: i32) -> VirtualDevice {
    match device {
        VirtualDevice::Disk {
            controller_key,
            capacity_kb,
            iops_limit,
            backing,
            ..
        } => VirtualDevice::Disk {
            key,
            controller_key,
            capacity_kb,
            iops_limit,
            backing,
        },
        VirtualDevice::Ethernet {
            adapter,
            backing,
            address_type,
            ..
        } => VirtualDevice::Ethernet {
            key,
            adapter,
            backing,
            address_type,
        },
        VirtualDevice::ScsiController { .. } => VirtualDevice::ScsiController { key },
        VirtualDevice::Other { label, .. } => VirtualDevice::Other { key, label },
    }
}
