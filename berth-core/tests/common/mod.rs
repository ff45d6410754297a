// Common fixtures for the planning integration tests

#![allow(dead_code)]

use berth_core::{
    clock::MockClock,
    config::BerthConfig,
    inventory::{InMemoryInventory, InventorySnapshot},
    manager::DeploymentPlanningManager,
    profile::{
        Account, AccountKind, DeploymentParams, DiskOffering, ServiceOffering, Template,
        VirtualMachineProfile, Volume, VolumeKind, VolumeState,
    },
    query::PlannerDependencies,
    types::{AccountId, HypervisorType, VmInstance, VmInstanceId, VmState, VmType, VolumeId},
};
use chrono::Utc;
use std::sync::Arc;

pub const GIB: u64 = 1 << 30;

/// One zone, one pod, two KVM clusters with one idle host and one cluster
/// pool each. Every host has 4 x 2000 MHz and 8 GiB of memory.
pub const TWO_CLUSTER_ZONE: &str = r#"
data_centers:
  - { id: 1, name: zone1 }
pods:
  - { id: 1, name: pod1, data_center_id: 1 }
clusters:
  - { id: 1, name: c1, data_center_id: 1, pod_id: 1 }
  - { id: 2, name: c2, data_center_id: 1, pod_id: 1 }
hosts:
  - { id: 1, uuid: h1, name: h1, data_center_id: 1, pod_id: 1, cluster_id: 1, cpus: 4, cpu_speed_mhz: 2000, total_memory_mb: 8192 }
  - { id: 2, uuid: h2, name: h2, data_center_id: 1, pod_id: 1, cluster_id: 2, cpus: 4, cpu_speed_mhz: 2000, total_memory_mb: 8192 }
pools:
  - { id: 1, uuid: p1, name: p1, data_center_id: 1, pod_id: 1, cluster_id: 1, scope: cluster, capacity_bytes: 1099511627776 }
  - { id: 2, uuid: p2, name: p2, data_center_id: 1, pod_id: 1, cluster_id: 2, scope: cluster, capacity_bytes: 1099511627776 }
"#;

/// A placement environment over an in-memory inventory with a frozen clock
pub struct TestEnv {
    pub inventory: Arc<InMemoryInventory>,
    pub clock: Arc<MockClock>,
    pub deps: PlannerDependencies,
    pub manager: DeploymentPlanningManager,
}

impl TestEnv {
    pub fn new(inventory_yaml: &str) -> Self {
        Self::with_config(inventory_yaml, BerthConfig::test())
    }

    /// Build the environment and register every host of zone 1
    pub fn with_config(inventory_yaml: &str, config: BerthConfig) -> Self {
        let snapshot = InventorySnapshot::from_yaml_str(inventory_yaml).unwrap();
        let inventory = Arc::new(InMemoryInventory::from_snapshot(
            snapshot,
            config.storage.clone(),
        ));
        let clock = Arc::new(MockClock::at(Utc::now()));
        let deps = PlannerDependencies::from_source_with_clock(inventory.clone(), clock.clone());
        let manager = DeploymentPlanningManager::new(deps.clone(), config).unwrap();
        manager.register_zone_hosts(1).unwrap();

        Self {
            inventory,
            clock,
            deps,
            manager,
        }
    }
}

pub fn account(id: AccountId) -> Account {
    Account {
        id,
        domain_id: 1,
        domain_path: vec![1],
        kind: AccountKind::User,
    }
}

pub fn offering(cpus: u32, cpu_speed_mhz: u32, memory_mb: u64) -> ServiceOffering {
    ServiceOffering {
        id: 1,
        name: "offering".to_string(),
        cpus,
        cpu_speed_mhz,
        memory_mb,
        host_tag: None,
        deployment_planner: None,
        vgpu: None,
        use_local_storage: false,
        implicit_dedication_mode: None,
    }
}

pub fn template() -> Template {
    Template {
        id: 1,
        name: "template".to_string(),
        deploy_as_is: false,
        guest_os_category: None,
        template_tag: None,
    }
}

pub fn disk_offering(use_local_storage: bool) -> DiskOffering {
    DiskOffering {
        id: 1,
        name: if use_local_storage { "local" } else { "shared" }.to_string(),
        use_local_storage,
        encrypt: false,
        tags: vec![],
    }
}

pub fn volume(id: VolumeId, kind: VolumeKind, size_gib: u64, local: bool) -> Volume {
    Volume {
        id,
        name: format!("vol-{}", id),
        kind,
        state: VolumeState::Allocated,
        size_bytes: size_gib * GIB,
        pool_id: None,
        disk_offering: disk_offering(local),
        has_passphrase: false,
        min_iops: None,
    }
}

pub fn vm_instance(id: VmInstanceId, account_id: AccountId) -> VmInstance {
    VmInstance {
        id,
        name: format!("vm-{}", id),
        vm_type: VmType::User,
        account_id,
        data_center_id: 1,
        hypervisor: HypervisorType::Kvm,
        state: VmState::Starting,
        host_id: None,
        last_host_id: None,
        migrating_to: None,
        updated_at: Utc::now(),
        implicit_dedication: None,
    }
}

/// A starting user VM asking for 2 x 1000 MHz and 2 GiB with a 10 GiB root
/// volume on shared storage
pub fn profile(vm_id: VmInstanceId, account_id: AccountId) -> VirtualMachineProfile {
    VirtualMachineProfile {
        vm: vm_instance(vm_id, account_id),
        owner: account(account_id),
        service_offering: offering(2, 1000, 2048),
        template: template(),
        volumes: vec![volume(vm_id * 10, VolumeKind::Root, 10, false)],
        affinity_groups: vec![],
        params: DeploymentParams::default(),
    }
}
