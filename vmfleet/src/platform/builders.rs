//! Pure builders for platform request specs.
//!
//! Nothing here talks to the platform; every function turns resolved
//! handles and instance settings into the structures a request carries.

use super::types::{
    AdapterType, CloneSpec, DatastoreHandle, DeviceConfigSpec, DeviceOperation, DiskBacking,
    DiskLocator, FolderHandle, HostHandle, IpCustomization, MacAddressType, ManagedObjectRef,
    NetworkBacking, NetworkDeviceSpec, ProvisioningType, RelocateSpec, ResourcePoolHandle,
    StoragePlacementSpec, VirtualDevice, VmConfigSpec, VmHandle,
};
use std::net::Ipv4Addr;
use vmfleet_shared::{FleetError, FleetResult};

/// Key the platform replaces with a real one when the device is added.
pub const NEW_DEVICE_KEY: i32 = -1;

/// Placeholder clone name used when asking a storage pod for placement.
pub const PLACEMENT_CLONE_NAME: &str = "dummy";

/// Dotted subnet mask for an IPv4 prefix length.
///
/// A zero prefix is rejected rather than defaulted: an address without a
/// prefix is an incomplete interface description.
pub fn subnet_mask(prefix_length: u8) -> FleetResult<Ipv4Addr> {
    match prefix_length {
        0 => Err(FleetError::InputValidationFailed(
            "ipv4 prefix length is empty".to_string(),
        )),
        1..=32 => Ok(Ipv4Addr::from(u32::MAX << (32 - u32::from(prefix_length)))),
        other => Err(FleetError::InputValidationFailed(format!(
            "ipv4 prefix length {} is out of range",
            other
        ))),
    }
}

/// IP settings for one interface: DHCP without an address, fixed otherwise.
pub fn build_ip_customization(
    address: Option<Ipv4Addr>,
    prefix_length: u8,
    gateway: Option<Ipv4Addr>,
) -> FleetResult<IpCustomization> {
    let Some(address) = address else {
        return Ok(IpCustomization::Dhcp);
    };

    Ok(IpCustomization::Fixed {
        address,
        subnet_mask: subnet_mask(prefix_length)?,
        gateways: gateway.into_iter().collect(),
    })
}

/// Key of the template disk the relocate spec targets.
///
/// Takes the last virtual disk, as the relocate locator addresses a single
/// disk.
pub fn template_disk_key(devices: &[VirtualDevice]) -> Option<i32> {
    devices
        .iter()
        .filter(|d| d.is_disk())
        .map(VirtualDevice::key)
        .last()
}

/// Relocate spec placing the clone on `pool`/`datastore`/`host`.
///
/// Only one provisioning type governs the single disk locator; callers
/// pass the first disk descriptor's type. Thin stays thin, every other
/// type is eagerly scrubbed.
pub fn build_relocate_spec(
    pool: &ResourcePoolHandle,
    datastore: &DatastoreHandle,
    host: &HostHandle,
    disk_key: i32,
    provisioning: ProvisioningType,
) -> RelocateSpec {
    let datastore_ref = datastore.reference().clone();

    RelocateSpec {
        datastore: Some(datastore_ref.clone()),
        pool: Some(pool.reference().clone()),
        host: Some(host.reference().clone()),
        disks: vec![DiskLocator {
            disk_id: disk_key,
            datastore: datastore_ref,
            backing: Some(DiskBacking::for_relocate(provisioning)),
        }],
    }
}

/// Device spec adding one NIC with a generated MAC on `backing`.
pub fn build_network_device(backing: NetworkBacking, adapter: AdapterType) -> NetworkDeviceSpec {
    DeviceConfigSpec {
        operation: DeviceOperation::Add,
        device: VirtualDevice::Ethernet {
            key: NEW_DEVICE_KEY,
            adapter,
            backing,
            address_type: MacAddressType::Generated,
        },
    }
}

/// Hardware settings applied by the clone.
pub fn build_vm_config(
    num_cpus: Option<u32>,
    memory_mb: Option<u64>,
    network_devices: &[NetworkDeviceSpec],
    extra_config: &std::collections::BTreeMap<String, String>,
) -> VmConfigSpec {
    VmConfigSpec {
        num_cpus,
        num_cores_per_socket: num_cpus.map(|_| 1),
        memory_mb,
        device_change: network_devices.to_vec(),
        extra_config: extra_config.clone(),
    }
}

/// Clone spec for a powered-off, non-template copy.
pub fn build_clone_spec(location: RelocateSpec, config: VmConfigSpec) -> CloneSpec {
    CloneSpec {
        location,
        template: false,
        power_on: false,
        config: Some(config),
    }
}

/// Placement request asking `storage_pod` where a clone of `template` fits.
pub fn build_clone_placement_spec(
    vm_folder: &FolderHandle,
    template: &VmHandle,
    template_datastore: ManagedObjectRef,
    template_disk_key: i32,
    pool: &ResourcePoolHandle,
    storage_pod: ManagedObjectRef,
) -> StoragePlacementSpec {
    let clone_spec = CloneSpec {
        location: RelocateSpec {
            datastore: None,
            pool: Some(pool.reference().clone()),
            host: None,
            disks: vec![DiskLocator {
                disk_id: template_disk_key,
                datastore: template_datastore,
                backing: None,
            }],
        },
        template: false,
        power_on: false,
        config: None,
    };

    StoragePlacementSpec {
        storage_pod,
        vm: Some(template.reference().clone()),
        clone_spec: Some(clone_spec),
        clone_name: PLACEMENT_CLONE_NAME.to_string(),
        folder: vm_folder.reference().clone(),
        resource_pool: None,
    }
}

/// Disk to add on `controller_key`, sized in GiB.
pub fn build_hard_disk(
    controller_key: i32,
    datastore: &DatastoreHandle,
    size_gb: u64,
    iops_limit: Option<i64>,
    provisioning: ProvisioningType,
) -> VirtualDevice {
    VirtualDevice::Disk {
        key: NEW_DEVICE_KEY,
        controller_key,
        capacity_kb: (size_gb as i64).saturating_mul(1024 * 1024),
        iops_limit: iops_limit.filter(|limit| *limit != 0),
        backing: DiskBacking::for_provisioning(provisioning, Some(datastore.reference().clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::types::ObjectKind;

    fn pool() -> ResourcePoolHandle {
        ResourcePoolHandle::new(
            ManagedObjectRef::new(ObjectKind::ResourcePool, "resgroup-8"),
            "/dc1/host/cluster1/Resources",
        )
    }

    fn datastore() -> DatastoreHandle {
        DatastoreHandle::new(
            ManagedObjectRef::new(ObjectKind::Datastore, "datastore-15"),
            "/dc1/datastore/datastore15",
        )
    }

    fn host() -> HostHandle {
        HostHandle::new(
            ManagedObjectRef::new(ObjectKind::HostSystem, "host-21"),
            "/dc1/host/cluster1/10.10.221.15",
        )
    }

    #[test]
    fn test_subnet_mask_from_prefix() {
        assert_eq!(subnet_mask(24).unwrap(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(subnet_mask(20).unwrap(), Ipv4Addr::new(255, 255, 240, 0));
        assert_eq!(subnet_mask(32).unwrap(), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(subnet_mask(1).unwrap(), Ipv4Addr::new(128, 0, 0, 0));
    }

    #[test]
    fn test_zero_prefix_is_validation_failure() {
        let err = subnet_mask(0).unwrap_err();
        assert!(matches!(err, FleetError::InputValidationFailed(_)));
        assert!(subnet_mask(33).is_err());
    }

    #[test]
    fn test_ip_customization_dhcp_without_address() {
        let ip = build_ip_customization(None, 0, None).unwrap();
        assert_eq!(ip, IpCustomization::Dhcp);
    }

    #[test]
    fn test_ip_customization_fixed_pairs_gateway() {
        let ip = build_ip_customization(
            Some(Ipv4Addr::new(10, 10, 12, 40)),
            24,
            Some(Ipv4Addr::new(10, 10, 12, 1)),
        )
        .unwrap();

        assert_eq!(
            ip,
            IpCustomization::Fixed {
                address: Ipv4Addr::new(10, 10, 12, 40),
                subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
                gateways: vec![Ipv4Addr::new(10, 10, 12, 1)],
            }
        );
    }

    #[test]
    fn test_template_disk_key_takes_last_disk() {
        let backing = DiskBacking::for_provisioning(ProvisioningType::Thin, None);
        let devices = vec![
            VirtualDevice::ScsiController { key: 1000 },
            VirtualDevice::Disk {
                key: 2000,
                controller_key: 1000,
                capacity_kb: 1,
                iops_limit: None,
                backing: backing.clone(),
            },
            VirtualDevice::Disk {
                key: 2001,
                controller_key: 1000,
                capacity_kb: 1,
                iops_limit: None,
                backing,
            },
        ];
        assert_eq!(template_disk_key(&devices), Some(2001));
        assert_eq!(template_disk_key(&devices[..1]), None);
    }

    #[test]
    fn test_relocate_spec_scrubs_every_non_thin_type() {
        let thin = build_relocate_spec(&pool(), &datastore(), &host(), 2000, ProvisioningType::Thin);
        let backing = thin.disks[0].backing.clone().unwrap();
        assert!(backing.thin_provisioned);
        assert!(!backing.eagerly_scrub);
        assert_eq!(backing.disk_mode, "persistent");
        assert_eq!(thin.disks[0].disk_id, 2000);
        assert_eq!(thin.host, Some(host().reference));

        let eager = build_relocate_spec(
            &pool(),
            &datastore(),
            &host(),
            2000,
            ProvisioningType::EagerZeroed,
        );
        let backing = eager.disks[0].backing.clone().unwrap();
        assert!(!backing.thin_provisioned);
        assert!(backing.eagerly_scrub);

        let thick = build_relocate_spec(&pool(), &datastore(), &host(), 2000, ProvisioningType::Thick);
        let backing = thick.disks[0].backing.clone().unwrap();
        assert!(!backing.thin_provisioned);
        assert!(backing.eagerly_scrub);

        let default = build_relocate_spec(
            &pool(),
            &datastore(),
            &host(),
            2000,
            ProvisioningType::default(),
        );
        let backing = default.disks[0].backing.clone().unwrap();
        assert_eq!(backing.eagerly_scrub, !backing.thin_provisioned);
    }

    #[test]
    fn test_hard_disk_thick_is_lazily_zeroed() {
        match build_hard_disk(1000, &datastore(), 10, None, ProvisioningType::Thick) {
            VirtualDevice::Disk { backing, .. } => {
                assert!(!backing.thin_provisioned);
                assert!(!backing.eagerly_scrub);
            }
            other => panic!("unexpected device {:?}", other),
        }
    }

    #[test]
    fn test_clone_spec_is_powered_off_copy() {
        let nic = build_network_device(
            NetworkBacking {
                device_name: "VM Network".into(),
            },
            AdapterType::Vmxnet3,
        );
        let config = build_vm_config(Some(4), Some(4096), &[nic.clone()], &Default::default());
        let spec = build_clone_spec(RelocateSpec::default(), config);

        assert!(!spec.power_on);
        assert!(!spec.template);
        let config = spec.config.unwrap();
        assert_eq!(config.num_cores_per_socket, Some(1));
        assert_eq!(config.device_change, vec![nic]);
    }

    #[test]
    fn test_hard_disk_size_and_iops() {
        let disk = build_hard_disk(1000, &datastore(), 20, Some(0), ProvisioningType::Thin);
        match disk {
            VirtualDevice::Disk {
                capacity_kb,
                iops_limit,
                backing,
                ..
            } => {
                assert_eq!(capacity_kb, 20 * 1024 * 1024);
                assert_eq!(iops_limit, None);
                assert!(backing.thin_provisioned);
            }
            other => panic!("unexpected device {:?}", other),
        }
    }
}
