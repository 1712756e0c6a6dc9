//! End-to-end batches against the simulated platform.

use std::net::Ipv4Addr;
use std::sync::Arc;
use vmfleet::config::InstanceDefaults;
use vmfleet::platform::sim::{Inventory, SimulatedPlatform};
use vmfleet::platform::{NetworkBacking, PlatformApi, ProvisioningType, VirtualDevice};
use vmfleet::spec::{HardDisk, parse_batch};
use vmfleet::{AbortPolicy, BatchReport, FleetConfig, FleetCoordinator, InstanceSpec, PlatformClient};
use vmfleet::{Outcome, ProvisionState};

const INVENTORY: &str = r#"{
    "datacenters": [{
        "name": "dc1",
        "clusters": [{ "name": "cluster1", "hosts": ["esx-01", "esx-02"] }],
        "datastores": ["ds1"],
        "storage_pods": [
            { "name": "pod1", "datastores": ["pod-ds1", "pod-ds2"], "recommendations": ["pod-ds2"] },
            { "name": "pod-empty", "datastores": ["pod-ds3"] }
        ],
        "folders": ["web"],
        "networks": ["VM Network", "backend"],
        "templates": [{ "path": "templates/centos7", "datastore": "ds1", "guest_id": "centos7_64Guest" }]
    }]
}"#;

fn inventory() -> Inventory {
    Inventory::from_json(INVENTORY).unwrap()
}

fn test_config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.instance.cluster = Some("cluster1".to_string());
    config.instance.folder = Some("web".to_string());
    config.instance.network_label = Some("backend".to_string());
    config.instance.gateway = Some(Ipv4Addr::new(10, 10, 12, 1));
    config.polling.interval_ms = 1;
    config.guest.interface_file = "/etc/sysconfig/network-scripts/ifcfg-eth0".to_string();
    config.guest.username = Some("root".to_string());
    config.guest.password = Some("changeme".to_string());
    config
}

fn specs(batch: &str, defaults: &InstanceDefaults) -> Vec<InstanceSpec> {
    parse_batch(batch, defaults).unwrap()
}

async fn run_batch(
    sim: &Arc<SimulatedPlatform>,
    config: FleetConfig,
    specs: Vec<InstanceSpec>,
) -> BatchReport {
    let api: Arc<dyn PlatformApi> = sim.clone();
    let client = PlatformClient::with_serialization(api, config.serialize_platform_calls);
    FleetCoordinator::new(client, config).run(specs).await
}

fn outcome<'a>(report: &'a BatchReport, name: &str) -> &'a Outcome {
    report
        .outcomes
        .iter()
        .find(|o| o.identity == name)
        .unwrap_or_else(|| panic!("no outcome for {}", name))
}

fn failure_kind(outcome: &Outcome) -> &'static str {
    outcome.failure.as_ref().map(|f| f.kind).unwrap_or("none")
}

#[tokio::test]
async fn test_batch_reports_one_outcome_per_instance() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let config = test_config();
    let batch = specs(
        "# address name host datastore template\n\
         10.10.12.40 web-01 esx-01 ds1 templates/centos7\n\
         10.10.12.41 web-02 esx-09 ds1 templates/centos7\n",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.succeeded(), 1);

    let ready = outcome(&report, "web-01");
    assert!(ready.succeeded());
    assert_eq!(ready.detail, "ready at 10.10.12.40");
    assert_eq!(sim.vm_address("web-01"), Some(Ipv4Addr::new(10, 10, 12, 40)));

    let failed = outcome(&report, "web-02");
    assert_eq!(failed.state(), Some(ProvisionState::ResolvingPlacement));
    assert_eq!(failure_kind(failed), "NotFound");
    assert_eq!(failed.failure.as_ref().unwrap().task.as_deref(), Some("host"));

    let journal = sim.journal();
    assert_eq!(journal.clones.len(), 1);
    assert_eq!(journal.clones[0].name, "web-01");
    assert_eq!(journal.clones[0].folder, "/dc1/vm/web");
}

#[tokio::test]
async fn test_guest_rewrite_runs_sed_then_reboots() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let config = test_config();
    let batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;
    assert!(report.all_succeeded());

    let journal = sim.journal();
    assert_eq!(journal.programs.len(), 1);
    let program = &journal.programs[0];
    assert_eq!(program.vm, "web-01");
    assert_eq!(program.spec.program_path, "/bin/sed");
    assert_eq!(
        program.spec.arguments,
        r"-i 's/10\.10\.10\.10/10.10.12.40/g' /etc/sysconfig/network-scripts/ifcfg-eth0"
    );
    assert_eq!(journal.reboots, vec!["web-01"]);
    assert_eq!(journal.power_ons, vec!["web-01"]);
}

#[tokio::test]
async fn test_zero_prefix_fails_before_any_clone() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let mut config = test_config();
    config.instance.prefix_length = 0;
    let batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    let failed = outcome(&report, "web-01");
    assert_eq!(failed.state(), Some(ProvisionState::Validating));
    assert_eq!(failure_kind(failed), "InputValidationFailed");
    assert!(sim.journal().clones.is_empty());
}

#[tokio::test]
async fn test_storage_pod_recommendation_places_clone() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let config = test_config();
    let batch = specs(
        "10.10.12.40 web-01 esx-01 pod1 templates/centos7\n\
         10.10.12.41 web-02 esx-02 pod-empty templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    assert!(outcome(&report, "web-01").succeeded());
    let failed = outcome(&report, "web-02");
    assert_eq!(failed.state(), Some(ProvisionState::ResolvingPlacement));
    assert_eq!(failure_kind(failed), "NoPlacementRecommendation");

    let journal = sim.journal();
    let mut placements = journal.placements.clone();
    placements.sort();
    assert_eq!(placements, vec!["pod-empty", "pod1"]);
    assert_eq!(journal.clones.len(), 1);
}

#[tokio::test]
async fn test_reconciled_devices_match_desired_set() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let config = test_config();
    let mut batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7",
        &config.instance,
    );
    batch[0].disks.push(HardDisk {
        size_gb: 20,
        iops_limit: 500,
        provisioning: ProvisioningType::Thin,
    });
    // Zero-sized extra disks are skipped.
    batch[0].disks.push(HardDisk {
        size_gb: 0,
        iops_limit: 0,
        provisioning: ProvisioningType::Thin,
    });

    let report = run_batch(&sim, config, batch).await;
    assert!(report.all_succeeded(), "{:?}", report.outcomes);

    let devices = sim.vm_devices("web-01").unwrap();
    let nics: Vec<&NetworkBacking> = devices
        .iter()
        .filter_map(|d| match d {
            VirtualDevice::Ethernet { backing, .. } => Some(backing),
            _ => None,
        })
        .collect();
    assert_eq!(nics.len(), 1);
    assert_eq!(nics[0].device_name, "backend");

    let disks: Vec<i64> = devices
        .iter()
        .filter_map(|d| match d {
            VirtualDevice::Disk { capacity_kb, .. } => Some(*capacity_kb),
            _ => None,
        })
        .collect();
    assert_eq!(disks.len(), 2);
    assert!(disks.contains(&(20 * 1024 * 1024)));
}

#[tokio::test]
async fn test_power_on_times_out_after_configured_polls() {
    let mut inventory = inventory();
    inventory.guest.power_on_after_polls = None;
    let sim = Arc::new(SimulatedPlatform::new(inventory));
    let config = test_config();
    let batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    let failed = outcome(&report, "web-01");
    assert_eq!(failed.state(), Some(ProvisionState::GuestBooting));
    assert_eq!(failure_kind(failed), "Timeout");
    assert_eq!(sim.journal().power_polls.get("web-01"), Some(&10));
}

#[tokio::test]
async fn test_tools_wait_times_out_after_configured_polls() {
    let mut inventory = inventory();
    inventory.guest.tools_after_polls = None;
    let sim = Arc::new(SimulatedPlatform::new(inventory));
    let config = test_config();
    let batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    let failed = outcome(&report, "web-01");
    assert_eq!(failed.state(), Some(ProvisionState::GuestBooting));
    assert_eq!(failure_kind(failed), "Timeout");
    assert_eq!(sim.journal().tools_polls.get("web-01"), Some(&30));
    assert!(sim.journal().programs.is_empty());
}

#[tokio::test]
async fn test_failed_clone_task_leaves_others_running() {
    let mut inventory = inventory();
    inventory.fail_clone = vec!["web-02".to_string()];
    let sim = Arc::new(SimulatedPlatform::new(inventory));
    let config = test_config();
    let batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7\n\
         10.10.12.41 web-02 esx-01 ds1 templates/centos7\n\
         10.10.12.42 web-03 esx-02 ds1 templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.succeeded(), 2);
    let failed = outcome(&report, "web-02");
    assert_eq!(failed.state(), Some(ProvisionState::AwaitingCloneTask));
    assert_eq!(failure_kind(failed), "TaskFailed");
    assert!(report.aborted);
}

#[tokio::test]
async fn test_abort_policy_stops_pending_instances() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let mut config = test_config();
    config.concurrency = 1;
    config.abort_policy = AbortPolicy::Abort;
    let batch = specs(
        "10.10.12.40 web-01 esx-09 ds1 templates/centos7\n\
         10.10.12.41 web-02 esx-01 ds1 templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    assert!(report.aborted);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(failure_kind(outcome(&report, "web-01")), "NotFound");
    let stopped = outcome(&report, "web-02");
    assert_eq!(failure_kind(stopped), "Aborted");
    assert_eq!(stopped.failure.as_ref().unwrap().task, None);
    assert!(sim.journal().clones.is_empty());
}

#[tokio::test]
async fn test_continue_policy_keeps_provisioning() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let mut config = test_config();
    config.concurrency = 1;
    let batch = specs(
        "10.10.12.40 web-01 esx-09 ds1 templates/centos7\n\
         10.10.12.41 web-02 esx-01 ds1 templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    assert_eq!(report.succeeded(), 1);
    assert!(outcome(&report, "web-02").succeeded());
}

#[tokio::test]
async fn test_serialized_platform_provisions_whole_batch() {
    let mut inventory = inventory();
    inventory.serial_only = true;
    let sim = Arc::new(SimulatedPlatform::new(inventory));
    let config = test_config();
    let batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7\n\
         10.10.12.41 web-02 esx-02 ds1 templates/centos7\n\
         10.10.12.42 web-03 esx-01 ds1 templates/centos7",
        &config.instance,
    );

    let api: Arc<dyn PlatformApi> = sim.clone();
    let client = PlatformClient::with_serialization(api, false);
    assert!(client.is_serialized());

    let report = FleetCoordinator::new(client, config).run(batch).await;
    assert!(report.all_succeeded(), "{:?}", report.outcomes);
    assert_eq!(sim.journal().clones.len(), 3);
}

#[tokio::test]
async fn test_unresolved_folder_falls_back_to_vm_folder() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let mut config = test_config();
    config.instance.folder = Some("missing".to_string());
    let batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    assert!(outcome(&report, "web-01").succeeded(), "{:?}", report.outcomes);
    let journal = sim.journal();
    assert_eq!(journal.clones.len(), 1);
    assert_eq!(journal.clones[0].folder, "/dc1/vm");
}

#[tokio::test]
async fn test_dhcp_instance_skips_address_rewrite() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let config = test_config();
    let mut batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7",
        &config.instance,
    );
    batch[0].interfaces[0].address = String::new();

    let report = run_batch(&sim, config, batch).await;

    assert!(outcome(&report, "web-01").succeeded(), "{:?}", report.outcomes);
    let journal = sim.journal();
    assert!(journal.programs.is_empty());
    assert!(journal.reboots.is_empty());
    assert_eq!(journal.power_ons, vec!["web-01"]);
    assert_eq!(sim.vm_address("web-01"), Some(Ipv4Addr::new(10, 10, 10, 10)));
}

#[tokio::test]
async fn test_unsupported_adapter_fails_before_clone() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let config = test_config();
    let mut batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7",
        &config.instance,
    );
    batch[0].interfaces[0].adapter = "pcnet32".to_string();

    let report = run_batch(&sim, config, batch).await;

    let failed = outcome(&report, "web-01");
    assert_eq!(failed.state(), Some(ProvisionState::NetworkSpecsBuilt));
    assert_eq!(failure_kind(failed), "UnsupportedAdapterType");
    assert_eq!(failed.failure.as_ref().unwrap().task.as_deref(), Some("network_specs"));
    assert!(sim.journal().clones.is_empty());
}

#[tokio::test]
async fn test_static_address_without_guest_credentials_fails_validation() {
    let sim = Arc::new(SimulatedPlatform::new(inventory()));
    let mut config = test_config();
    config.guest.username = None;
    config.guest.password = None;
    let batch = specs(
        "10.10.12.40 web-01 esx-01 ds1 templates/centos7",
        &config.instance,
    );

    let report = run_batch(&sim, config, batch).await;

    let failed = outcome(&report, "web-01");
    assert_eq!(failed.state(), Some(ProvisionState::Validating));
    assert_eq!(failure_kind(failed), "InputValidationFailed");
    let journal = sim.journal();
    assert!(journal.clones.is_empty());
    assert!(journal.power_ons.is_empty());
    assert!(journal.programs.is_empty());
}
