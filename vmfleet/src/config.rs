//! Batch-level configuration.
//!
//! Loaded from an optional JSON file; every field has a default so an empty
//! object (or no file at all) is a valid configuration. CLI flags override
//! individual fields after loading.

use crate::fleet::AbortPolicy;
use crate::platform::{GuestAuth, PollPolicy, ProvisioningType};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vmfleet_shared::{FleetError, FleetResult};

/// Default number of instances provisioned at once.
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Settings applied to every instance read from a batch file.
    pub instance: InstanceDefaults,
    pub concurrency: usize,
    pub abort_policy: AbortPolicy,
    /// Serialize platform calls even when the binding allows concurrency.
    pub serialize_platform_calls: bool,
    pub polling: PollingConfig,
    pub guest: GuestConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            instance: InstanceDefaults::default(),
            concurrency: DEFAULT_CONCURRENCY,
            abort_policy: AbortPolicy::default(),
            serialize_platform_calls: false,
            polling: PollingConfig::default(),
            guest: GuestConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstanceDefaults {
    pub datacenter: Option<String>,
    pub cluster: Option<String>,
    pub resource_pool: Option<String>,
    /// Folder relative to the datacenter's VM folder.
    pub folder: Option<String>,
    /// Network name; the platform default network when unset.
    pub network_label: Option<String>,
    pub adapter: String,
    pub prefix_length: u8,
    pub gateway: Option<Ipv4Addr>,
    /// Size of the instance's disk in GiB; 0 keeps the template's size.
    pub disk_size_gb: u64,
    pub disk_iops_limit: i64,
    pub disk_provisioning: ProvisioningType,
    pub num_cpus: Option<u32>,
    pub memory_mb: Option<u64>,
    pub domain: String,
    pub timezone: Option<String>,
    pub dns_suffixes: Vec<String>,
    pub dns_servers: Vec<String>,
    pub extra_config: BTreeMap<String, String>,
}

impl Default for InstanceDefaults {
    fn default() -> Self {
        Self {
            datacenter: None,
            cluster: None,
            resource_pool: None,
            folder: None,
            network_label: None,
            adapter: "vmxnet3".to_string(),
            prefix_length: 24,
            gateway: None,
            disk_size_gb: 0,
            disk_iops_limit: 0,
            disk_provisioning: ProvisioningType::Thick,
            num_cpus: None,
            memory_mb: None,
            domain: "vsphere.local".to_string(),
            timezone: None,
            dns_suffixes: vec!["vsphere.local".to_string()],
            dns_servers: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
            extra_config: BTreeMap::new(),
        }
    }
}

/// Polling bounds. Attempts are probe counts, not deadlines.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub power_on_attempts: u32,
    pub tools_attempts: u32,
    pub guest_ip_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            power_on_attempts: 10,
            tools_attempts: 30,
            guest_ip_attempts: 300,
        }
    }
}

impl PollingConfig {
    fn policy(&self, attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.interval_ms), attempts)
    }

    pub fn power_on(&self) -> PollPolicy {
        self.policy(self.power_on_attempts)
    }

    pub fn tools(&self) -> PollPolicy {
        self.policy(self.tools_attempts)
    }

    pub fn guest_ip(&self) -> PollPolicy {
        self.policy(self.guest_ip_attempts)
    }
}

/// In-guest address rewrite.
///
/// The rewrite replaces `placeholder_address` (the address baked into the
/// template) with the instance address in `interface_file`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    pub program_path: String,
    pub placeholder_address: Ipv4Addr,
    pub interface_file: String,
    pub working_directory: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            program_path: "/bin/sed".to_string(),
            placeholder_address: Ipv4Addr::new(10, 10, 10, 10),
            interface_file: "/etc/sysconfig/network-scripts/ifcfg-eth0".to_string(),
            working_directory: "/".to_string(),
            username: None,
            password: None,
        }
    }
}

impl GuestConfig {
    /// Guest credentials, when both halves are configured.
    pub fn auth(&self) -> Option<GuestAuth> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(GuestAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

impl FleetConfig {
    /// `<config dir>/vmfleet/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vmfleet").join("config.json"))
    }

    pub fn load(path: &Path) -> FleetResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            FleetError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: FleetConfig = serde_json::from_str(&json).map_err(|e| {
            FleetError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.sanitize()?;

        tracing::debug!(path = %path.display(), "Loaded fleet configuration");
        Ok(config)
    }

    /// Load `path`, else the default file if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> FleetResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn sanitize(&self) -> FleetResult<()> {
        if self.concurrency == 0 {
            return Err(FleetError::Config("concurrency must be at least 1".to_string()));
        }
        if self.instance.prefix_length > 32 {
            return Err(FleetError::Config(format!(
                "prefix_length {} is out of range",
                self.instance.prefix_length
            )));
        }

        let polling = &self.polling;
        for (name, attempts) in [
            ("power_on_attempts", polling.power_on_attempts),
            ("tools_attempts", polling.tools_attempts),
            ("guest_ip_attempts", polling.guest_ip_attempts),
        ] {
            if attempts == 0 {
                return Err(FleetError::Config(format!("{} must be at least 1", name)));
            }
        }

        self.instance.adapter.parse::<crate::platform::AdapterType>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.abort_policy, AbortPolicy::Continue);
        assert_eq!(config.polling.power_on().max_attempts, 10);
        assert_eq!(config.polling.tools().max_attempts, 30);
        assert_eq!(config.polling.guest_ip().interval, Duration::from_secs(1));
        assert_eq!(config.instance.prefix_length, 24);
        assert_eq!(config.guest.program_path, "/bin/sed");
        assert!(config.guest.auth().is_none());
        config.sanitize().unwrap();
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "concurrency": 4,
                "abort_policy": "abort",
                "instance": {{ "cluster": "cluster1", "gateway": "10.10.12.1", "disk_provisioning": "thin" }},
                "polling": {{ "interval_ms": 10 }},
                "guest": {{ "username": "root", "password": "changeme" }}
            }}"#
        )
        .unwrap();

        let config = FleetConfig::load(file.path()).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.abort_policy, AbortPolicy::Abort);
        assert_eq!(config.instance.cluster.as_deref(), Some("cluster1"));
        assert_eq!(config.instance.gateway, Some(Ipv4Addr::new(10, 10, 12, 1)));
        assert_eq!(config.instance.disk_provisioning, ProvisioningType::Thin);
        assert_eq!(config.instance.prefix_length, 24);
        assert_eq!(config.polling.tools_attempts, 30);
        assert_eq!(config.guest.auth().unwrap().username, "root");
    }

    #[test]
    fn test_sanitize_rejects_bad_values() {
        let mut config = FleetConfig::default();
        config.concurrency = 0;
        assert!(matches!(config.sanitize(), Err(FleetError::Config(_))));

        let mut config = FleetConfig::default();
        config.polling.tools_attempts = 0;
        assert!(config.sanitize().unwrap_err().to_string().contains("tools_attempts"));

        let mut config = FleetConfig::default();
        config.instance.prefix_length = 33;
        assert!(config.sanitize().is_err());

        let mut config = FleetConfig::default();
        config.instance.adapter = "pcnet32".to_string();
        assert!(matches!(
            config.sanitize(),
            Err(FleetError::UnsupportedAdapterType(_))
        ));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FleetConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }
}
