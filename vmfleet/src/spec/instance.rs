//! Declarative description of one VM to provision.

use crate::platform::ProvisioningType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use vmfleet_shared::{FleetError, FleetResult};

/// One instance of a batch. Immutable once handed to a provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// VM name; expected to be unique within a batch.
    pub name: String,
    /// Host name inside the resource pool's cluster.
    pub host: String,
    /// Datastore or storage pod name.
    pub datastore: String,
    /// Template path relative to the datacenter's VM folder.
    pub template: String,
    pub interfaces: Vec<NetworkInterface>,
    /// The first disk's provisioning type governs the relocate spec; the
    /// rest are added after the clone.
    pub disks: Vec<HardDisk>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub resource_pool: Option<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default)]
    pub guest: GuestSettings,
    #[serde(default)]
    pub num_cpus: Option<u32>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub extra_config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Static IPv4 address; empty selects DHCP.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub prefix_length: u8,
    #[serde(default)]
    pub gateway: String,
    /// Network name; the platform default network when unset.
    #[serde(default)]
    pub label: Option<String>,
    /// Adapter model; empty selects vmxnet3.
    #[serde(default)]
    pub adapter: String,
}

impl NetworkInterface {
    pub fn is_dhcp(&self) -> bool {
        self.address.trim().is_empty()
    }

    pub fn ipv4_address(&self) -> FleetResult<Option<Ipv4Addr>> {
        parse_optional_ipv4("address", &self.address)
    }

    pub fn ipv4_gateway(&self) -> FleetResult<Option<Ipv4Addr>> {
        parse_optional_ipv4("gateway", &self.gateway)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardDisk {
    /// Size in GiB; 0 keeps the template disk's size.
    #[serde(default)]
    pub size_gb: u64,
    /// IOPS cap; 0 is unlimited.
    #[serde(default)]
    pub iops_limit: i64,
    #[serde(default)]
    pub provisioning: ProvisioningType,
}

/// Guest identity settings, published to the guest as `guestinfo.*`
/// extra-config keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestSettings {
    pub domain: String,
    pub timezone: Option<String>,
    pub dns_suffixes: Vec<String>,
    pub dns_servers: Vec<String>,
}

impl Default for GuestSettings {
    fn default() -> Self {
        Self {
            domain: "vsphere.local".to_string(),
            timezone: None,
            dns_suffixes: vec!["vsphere.local".to_string()],
            dns_servers: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
        }
    }
}

impl InstanceSpec {
    /// Input checks that need no platform call.
    pub fn validate(&self) -> FleetResult<()> {
        for (field, value) in [
            ("name", &self.name),
            ("host", &self.host),
            ("datastore", &self.datastore),
            ("template", &self.template),
        ] {
            if value.trim().is_empty() {
                return Err(FleetError::InputValidationFailed(format!(
                    "instance {} is empty",
                    field
                )));
            }
        }

        if self.interfaces.is_empty() {
            return Err(FleetError::InputValidationFailed(format!(
                "instance '{}' has no network interface",
                self.name
            )));
        }
        if self.disks.is_empty() {
            return Err(FleetError::InputValidationFailed(format!(
                "instance '{}' has no hard disk",
                self.name
            )));
        }

        for (index, nic) in self.interfaces.iter().enumerate() {
            let address = nic.ipv4_address()?;
            nic.ipv4_gateway()?;
            if address.is_some() && nic.prefix_length == 0 {
                return Err(FleetError::InputValidationFailed(format!(
                    "interface {} of '{}' has address {} but no prefix length",
                    index, self.name, nic.address
                )));
            }
            if nic.prefix_length > 32 {
                return Err(FleetError::InputValidationFailed(format!(
                    "interface {} of '{}' has prefix length {}",
                    index, self.name, nic.prefix_length
                )));
            }
        }

        Ok(())
    }

    /// First static address, used for the guest rewrite and readiness check.
    pub fn primary_address(&self) -> FleetResult<Option<Ipv4Addr>> {
        match self.interfaces.first() {
            Some(nic) => nic.ipv4_address(),
            None => Ok(None),
        }
    }

    /// Extra-config of the clone: user keys plus the guest settings.
    ///
    /// User keys win over generated `guestinfo.*` keys.
    pub fn clone_extra_config(&self) -> BTreeMap<String, String> {
        let mut config = BTreeMap::new();
        config.insert("guestinfo.hostname".to_string(), self.name.clone());
        config.insert("guestinfo.domain".to_string(), self.guest.domain.clone());
        if let Some(timezone) = &self.guest.timezone {
            config.insert("guestinfo.timezone".to_string(), timezone.clone());
        }
        if !self.guest.dns_suffixes.is_empty() {
            config.insert(
                "guestinfo.dns.suffixes".to_string(),
                self.guest.dns_suffixes.join(","),
            );
        }
        if !self.guest.dns_servers.is_empty() {
            config.insert(
                "guestinfo.dns.servers".to_string(),
                self.guest.dns_servers.join(","),
            );
        }
        config.extend(self.extra_config.clone());
        config
    }
}

fn parse_optional_ipv4(field: &str, value: &str) -> FleetResult<Option<Ipv4Addr>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| {
        FleetError::InputValidationFailed(format!("{} '{}' is not an IPv4 address", field, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_spec() -> InstanceSpec {
        InstanceSpec {
            name: "web-01".to_string(),
            host: "esx-01".to_string(),
            datastore: "ds1".to_string(),
            template: "templates/centos7".to_string(),
            interfaces: vec![NetworkInterface {
                address: "10.10.12.40".to_string(),
                prefix_length: 24,
                gateway: "10.10.12.1".to_string(),
                label: None,
                adapter: String::new(),
            }],
            disks: vec![HardDisk {
                size_gb: 0,
                iops_limit: 0,
                provisioning: ProvisioningType::Thick,
            }],
            folder: None,
            resource_pool: None,
            cluster: None,
            datacenter: None,
            guest: GuestSettings::default(),
            num_cpus: None,
            memory_mb: None,
            extra_config: BTreeMap::new(),
        }
    }

    #[test]
    fn test_valid_spec() {
        let spec = create_test_spec();
        spec.validate().unwrap();
        assert_eq!(spec.primary_address().unwrap(), Some(Ipv4Addr::new(10, 10, 12, 40)));
    }

    #[test]
    fn test_address_without_prefix_fails() {
        let mut spec = create_test_spec();
        spec.interfaces[0].prefix_length = 0;
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, FleetError::InputValidationFailed(_)));
        assert!(err.to_string().contains("no prefix length"));
    }

    #[test]
    fn test_dhcp_interface_needs_no_prefix() {
        let mut spec = create_test_spec();
        spec.interfaces[0].address = String::new();
        spec.interfaces[0].prefix_length = 0;
        spec.validate().unwrap();
        assert!(spec.interfaces[0].is_dhcp());
        assert_eq!(spec.primary_address().unwrap(), None);
    }

    #[test]
    fn test_missing_fields_and_lists() {
        let mut spec = create_test_spec();
        spec.host = " ".to_string();
        assert!(spec.validate().unwrap_err().to_string().contains("host"));

        let mut spec = create_test_spec();
        spec.disks.clear();
        assert!(spec.validate().unwrap_err().to_string().contains("no hard disk"));

        let mut spec = create_test_spec();
        spec.interfaces[0].address = "10.10.12".to_string();
        assert!(spec.validate().is_err());

        let mut spec = create_test_spec();
        spec.interfaces[0].gateway = "gateway".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_clone_extra_config_merges_guest_settings() {
        let mut spec = create_test_spec();
        spec.extra_config
            .insert("guestinfo.domain".to_string(), "corp.example".to_string());

        let config = spec.clone_extra_config();
        assert_eq!(config["guestinfo.hostname"], "web-01");
        assert_eq!(config["guestinfo.domain"], "corp.example");
        assert_eq!(config["guestinfo.dns.servers"], "8.8.8.8,8.8.4.4");
        assert!(!config.contains_key("guestinfo.timezone"));
    }
}
