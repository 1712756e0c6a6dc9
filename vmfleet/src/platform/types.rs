//! Platform object model as seen by the provisioning pipeline.
//!
//! These types mirror the narrow slice of the virtualization platform's
//! inventory and device model that cloning needs. Bindings translate them
//! to and from their SDK's own types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use vmfleet_shared::{FleetError, FleetResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Datacenter,
    Folder,
    ResourcePool,
    HostSystem,
    Datastore,
    StoragePod,
    VirtualMachine,
    Network,
    Task,
}

/// Opaque reference to a platform object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedObjectRef {
    pub kind: ObjectKind,
    pub value: String,
}

impl ManagedObjectRef {
    pub fn new(kind: ObjectKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.value)
    }
}

macro_rules! inventory_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub reference: ManagedObjectRef,
            pub inventory_path: String,
        }

        impl $name {
            pub fn new(reference: ManagedObjectRef, inventory_path: impl Into<String>) -> Self {
                Self {
                    reference,
                    inventory_path: inventory_path.into(),
                }
            }

            pub fn reference(&self) -> &ManagedObjectRef {
                &self.reference
            }

            /// Last segment of the inventory path.
            pub fn name(&self) -> &str {
                self.inventory_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&self.inventory_path)
            }
        }
    };
}

inventory_handle!(DatacenterHandle);
inventory_handle!(FolderHandle);
inventory_handle!(ResourcePoolHandle);
inventory_handle!(HostHandle);
inventory_handle!(DatastoreHandle);
inventory_handle!(
    /// Template or regular virtual machine.
    VmHandle
);

/// Well-known folders of a datacenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatacenterFolders {
    pub vm_folder: FolderHandle,
    pub host_folder: FolderHandle,
    pub datastore_folder: FolderHandle,
}

/// Handle on an asynchronous platform task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub reference: ManagedObjectRef,
    pub description: String,
}

// ============================================================================
// DEVICES
// ============================================================================

/// Virtual NIC model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterType {
    #[default]
    Vmxnet3,
    E1000,
}

impl FromStr for AdapterType {
    type Err = FleetError;

    /// An empty string selects the default adapter.
    fn from_str(s: &str) -> FleetResult<Self> {
        match s {
            "" | "vmxnet3" => Ok(AdapterType::Vmxnet3),
            "e1000" => Ok(AdapterType::E1000),
            other => Err(FleetError::UnsupportedAdapterType(other.to_string())),
        }
    }
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterType::Vmxnet3 => write!(f, "vmxnet3"),
            AdapterType::E1000 => write!(f, "e1000"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacAddressType {
    #[default]
    Generated,
    Manual,
    Assigned,
}

/// Network backing of an ethernet card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkBacking {
    pub device_name: String,
}

/// Disk provisioning policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningType {
    Thin,
    #[default]
    Thick,
    #[serde(alias = "eager-zeroed")]
    EagerZeroed,
}

impl ProvisioningType {
    pub fn is_thin(self) -> bool {
        self == ProvisioningType::Thin
    }

    pub fn is_eagerly_scrubbed(self) -> bool {
        self == ProvisioningType::EagerZeroed
    }
}

impl FromStr for ProvisioningType {
    type Err = FleetError;

    fn from_str(s: &str) -> FleetResult<Self> {
        match s {
            "thin" => Ok(ProvisioningType::Thin),
            "" | "thick" => Ok(ProvisioningType::Thick),
            "eager_zeroed" | "eager-zeroed" | "eagerzeroed" => Ok(ProvisioningType::EagerZeroed),
            other => Err(FleetError::InputValidationFailed(format!(
                "unknown disk provisioning type '{}'",
                other
            ))),
        }
    }
}

/// Flat disk backing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiskBacking {
    pub disk_mode: String,
    pub thin_provisioned: bool,
    pub eagerly_scrub: bool,
    #[serde(default)]
    pub datastore: Option<ManagedObjectRef>,
}

impl DiskBacking {
    pub fn for_provisioning(provisioning: ProvisioningType, datastore: Option<ManagedObjectRef>) -> Self {
        Self {
            disk_mode: "persistent".to_string(),
            thin_provisioned: provisioning.is_thin(),
            eagerly_scrub: provisioning.is_eagerly_scrubbed(),
            datastore,
        }
    }

    /// Backing for the relocated template disk: anything not thin is
    /// eagerly scrubbed.
    pub fn for_relocate(provisioning: ProvisioningType) -> Self {
        let thin = provisioning.is_thin();
        Self {
            disk_mode: "persistent".to_string(),
            thin_provisioned: thin,
            eagerly_scrub: !thin,
            datastore: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VirtualDevice {
    Disk {
        key: i32,
        #[serde(default)]
        controller_key: i32,
        capacity_kb: i64,
        #[serde(default)]
        iops_limit: Option<i64>,
        backing: DiskBacking,
    },
    Ethernet {
        key: i32,
        adapter: AdapterType,
        backing: NetworkBacking,
        #[serde(default)]
        address_type: MacAddressType,
    },
    ScsiController {
        key: i32,
    },
    Other {
        key: i32,
        label: String,
    },
}

impl VirtualDevice {
    pub fn key(&self) -> i32 {
        match self {
            VirtualDevice::Disk { key, .. }
            | VirtualDevice::Ethernet { key, .. }
            | VirtualDevice::ScsiController { key }
            | VirtualDevice::Other { key, .. } => *key,
        }
    }

    pub fn is_ethernet(&self) -> bool {
        matches!(self, VirtualDevice::Ethernet { .. })
    }

    pub fn is_disk(&self) -> bool {
        matches!(self, VirtualDevice::Disk { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOperation {
    Add,
    Remove,
    Edit,
}

/// One entry of a device-change list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfigSpec {
    pub operation: DeviceOperation,
    pub device: VirtualDevice,
}

/// A network card to add, built from the instance's interface.
pub type NetworkDeviceSpec = DeviceConfigSpec;

// ============================================================================
// CLONE / RELOCATE / PLACEMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskLocator {
    pub disk_id: i32,
    pub datastore: ManagedObjectRef,
    pub backing: Option<DiskBacking>,
}

/// Destination of a clone: pool, datastore and host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelocateSpec {
    pub datastore: Option<ManagedObjectRef>,
    pub pool: Option<ManagedObjectRef>,
    pub host: Option<ManagedObjectRef>,
    pub disks: Vec<DiskLocator>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VmConfigSpec {
    pub num_cpus: Option<u32>,
    pub num_cores_per_socket: Option<u32>,
    pub memory_mb: Option<u64>,
    pub device_change: Vec<DeviceConfigSpec>,
    pub extra_config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloneSpec {
    pub location: RelocateSpec,
    pub template: bool,
    pub power_on: bool,
    pub config: Option<VmConfigSpec>,
}

/// IP settings for one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpCustomization {
    Dhcp,
    Fixed {
        address: Ipv4Addr,
        subnet_mask: Ipv4Addr,
        gateways: Vec<Ipv4Addr>,
    },
}

/// Request for a storage DRS recommendation inside a storage pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePlacementSpec {
    pub storage_pod: ManagedObjectRef,
    pub vm: Option<ManagedObjectRef>,
    pub clone_spec: Option<CloneSpec>,
    pub clone_name: String,
    pub folder: ManagedObjectRef,
    pub resource_pool: Option<ManagedObjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementAction {
    Storage { destination: ManagedObjectRef },
    Other { description: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoragePlacementRecommendation {
    pub actions: Vec<PlacementAction>,
}

// ============================================================================
// POWER / GUEST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

/// Credentials for guest-agent operations.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct GuestAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for GuestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestProgramSpec {
    pub program_path: String,
    pub arguments: String,
    pub working_directory: String,
    pub env_variables: Vec<String>,
}

/// Parameters for one platform session, supplied once per batch.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_type_defaults_to_vmxnet3() {
        assert_eq!("".parse::<AdapterType>().unwrap(), AdapterType::Vmxnet3);
        assert_eq!("e1000".parse::<AdapterType>().unwrap(), AdapterType::E1000);
        let err = "pcnet32".parse::<AdapterType>().unwrap_err();
        assert!(matches!(err, FleetError::UnsupportedAdapterType(_)));
    }

    #[test]
    fn test_provisioning_type_parsing() {
        assert_eq!("thin".parse::<ProvisioningType>().unwrap(), ProvisioningType::Thin);
        assert_eq!("".parse::<ProvisioningType>().unwrap(), ProvisioningType::Thick);
        assert_eq!(
            "eager_zeroed".parse::<ProvisioningType>().unwrap(),
            ProvisioningType::EagerZeroed
        );
        assert!("sparse".parse::<ProvisioningType>().is_err());
    }

    #[test]
    fn test_handle_name_is_last_path_segment() {
        let host = HostHandle::new(
            ManagedObjectRef::new(ObjectKind::HostSystem, "host-12"),
            "/dc1/host/cluster1/10.10.221.15",
        );
        assert_eq!(host.name(), "10.10.221.15");
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let auth = GuestAuth {
            username: "root".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("root"));
        assert!(!rendered.contains("hunter2"));
    }
}
