//! Batch file parser.
//!
//! One instance per line, five whitespace-separated fields:
//!
//! ```text
//! # address      name     host           datastore  template
//! 10.10.12.40    web-01   10.10.221.15   ds1        templates/centos7
//! ```
//!
//! Blank lines and `#` comments are skipped. Any other line with a field
//! count other than five fails the whole batch.

use super::instance::{GuestSettings, HardDisk, InstanceSpec, NetworkInterface};
use crate::config::InstanceDefaults;
use std::path::Path;
use vmfleet_shared::{FleetError, FleetResult};

const BATCH_FIELDS: usize = 5;

pub fn read_batch(path: &Path, defaults: &InstanceDefaults) -> FleetResult<Vec<InstanceSpec>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| FleetError::Config(format!("cannot read batch {}: {}", path.display(), e)))?;
    parse_batch(&text, defaults)
}

pub fn parse_batch(text: &str, defaults: &InstanceDefaults) -> FleetResult<Vec<InstanceSpec>> {
    let mut specs = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != BATCH_FIELDS {
            return Err(FleetError::Config(format!(
                "batch line {}: expected {} fields (address name host datastore template), found {}",
                index + 1,
                BATCH_FIELDS,
                fields.len()
            )));
        }

        specs.push(instance_from_fields(
            fields[0], fields[1], fields[2], fields[3], fields[4], defaults,
        ));
    }

    if specs.is_empty() {
        return Err(FleetError::Config(
            "batch contains no instances".to_string(),
        ));
    }
    Ok(specs)
}

fn instance_from_fields(
    address: &str,
    name: &str,
    host: &str,
    datastore: &str,
    template: &str,
    defaults: &InstanceDefaults,
) -> InstanceSpec {
    InstanceSpec {
        name: name.to_string(),
        host: host.to_string(),
        datastore: datastore.to_string(),
        template: template.to_string(),
        interfaces: vec![NetworkInterface {
            address: address.to_string(),
            prefix_length: defaults.prefix_length,
            gateway: defaults.gateway.map(|g| g.to_string()).unwrap_or_default(),
            label: defaults.network_label.clone(),
            adapter: defaults.adapter.clone(),
        }],
        disks: vec![HardDisk {
            size_gb: defaults.disk_size_gb,
            iops_limit: defaults.disk_iops_limit,
            provisioning: defaults.disk_provisioning,
        }],
        folder: defaults.folder.clone(),
        resource_pool: defaults.resource_pool.clone(),
        cluster: defaults.cluster.clone(),
        datacenter: defaults.datacenter.clone(),
        guest: GuestSettings {
            domain: defaults.domain.clone(),
            timezone: defaults.timezone.clone(),
            dns_suffixes: defaults.dns_suffixes.clone(),
            dns_servers: defaults.dns_servers.clone(),
        },
        num_cpus: defaults.num_cpus,
        memory_mb: defaults.memory_mb,
        extra_config: defaults.extra_config.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ProvisioningType;
    use std::net::Ipv4Addr;

    #[test]
    fn test_five_fields_map_in_order() {
        let defaults = InstanceDefaults {
            gateway: Some(Ipv4Addr::new(10, 10, 12, 1)),
            cluster: Some("cluster1".to_string()),
            ..Default::default()
        };
        let specs = parse_batch(
            "10.10.12.40 web-01 10.10.221.15 ds1 templates/centos7\n",
            &defaults,
        )
        .unwrap();

        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.interfaces[0].address, "10.10.12.40");
        assert_eq!(spec.name, "web-01");
        assert_eq!(spec.host, "10.10.221.15");
        assert_eq!(spec.datastore, "ds1");
        assert_eq!(spec.template, "templates/centos7");
        assert_eq!(spec.interfaces[0].prefix_length, 24);
        assert_eq!(spec.interfaces[0].gateway, "10.10.12.1");
        assert_eq!(spec.cluster.as_deref(), Some("cluster1"));
        assert_eq!(spec.disks[0].provisioning, ProvisioningType::Thick);
        spec.validate().unwrap();
    }

    #[test]
    fn test_short_line_fails_whole_batch() {
        let text = "10.10.12.40 web-01 esx-01 ds1 templates/centos7\n\
                    10.10.12.41 web-02 esx-01 ds1\n";
        let err = parse_batch(text, &InstanceDefaults::default()).unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
        assert!(err.to_string().contains("batch line 2"));
        assert!(err.to_string().contains("found 4"));
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let text = "# fleet\n\n  10.10.12.40 web-01 esx-01 ds1 t  \n# end\n";
        let specs = parse_batch(text, &InstanceDefaults::default()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].template, "t");
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let err = parse_batch("# nothing\n", &InstanceDefaults::default()).unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn test_read_batch_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.txt");
        std::fs::write(&path, "10.10.12.40 web-01 esx-01 ds1 t\n10.10.12.41 web-02 esx-01 ds1 t\n").unwrap();

        let specs = read_batch(&path, &InstanceDefaults::default()).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].name, "web-02");
    }
}
