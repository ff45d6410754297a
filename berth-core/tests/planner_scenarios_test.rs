//! Integration tests for end-to-end placement through the planning manager

mod common;

use berth_core::{
    capacity::{CapacityRecord, HostCapacity},
    config::BerthConfig,
    planner::RegisteredPlanner,
    profile::{AccountKind, BootType, VgpuRequirement, VolumeKind},
    reservation::ResourceUsage,
    types::{
        AllocationState, GpuGroup, HostResourceState, HypervisorType, ImplicitDedicationMode, Pod,
        VgpuCapacity, VmState,
    },
    DeploymentPlan, ExcludeList, VirtualMachineProfile,
};
use common::*;
use pretty_assertions::assert_eq;

fn cpu_used(host_id: u64, used: u64) -> HostCapacity {
    HostCapacity {
        host_id,
        cpu: CapacityRecord {
            total: 8000,
            used,
            reserved: 0,
        },
        memory: CapacityRecord::new(8192),
    }
}

fn thresholds_at(limit: f64) -> BerthConfig {
    let mut config = BerthConfig::test();
    config.planner.cluster_cpu_disable_threshold = limit;
    config.planner.cluster_memory_disable_threshold = limit;
    config
}

/// Two pods with one cluster, one host and one pool each
const TWO_POD_ZONE: &str = r#"
data_centers:
  - { id: 1, name: zone1 }
pods:
  - { id: 1, name: pod1, data_center_id: 1 }
  - { id: 2, name: pod2, data_center_id: 1 }
clusters:
  - { id: 1, name: c1, data_center_id: 1, pod_id: 1 }
  - { id: 2, name: c2, data_center_id: 1, pod_id: 2 }
hosts:
  - { id: 1, uuid: h1, name: h1, data_center_id: 1, pod_id: 1, cluster_id: 1, cpus: 4, cpu_speed_mhz: 2000, total_memory_mb: 8192 }
  - { id: 2, uuid: h2, name: h2, data_center_id: 1, pod_id: 2, cluster_id: 2, cpus: 4, cpu_speed_mhz: 2000, total_memory_mb: 8192 }
pools:
  - { id: 1, uuid: p1, name: p1, data_center_id: 1, pod_id: 1, cluster_id: 1, scope: cluster, capacity_bytes: 1099511627776 }
  - { id: 2, uuid: p2, name: p2, data_center_id: 1, pod_id: 2, cluster_id: 2, scope: cluster, capacity_bytes: 1099511627776 }
"#;

/// One KVM cluster and a bare-metal cluster with two free machines
const BARE_METAL_ZONE: &str = r#"
data_centers:
  - { id: 1, name: zone1 }
pods:
  - { id: 1, name: pod1, data_center_id: 1 }
clusters:
  - { id: 1, name: kvm, data_center_id: 1, pod_id: 1 }
  - { id: 3, name: metal, data_center_id: 1, pod_id: 1, hypervisor: baremetal }
hosts:
  - { id: 1, uuid: h1, name: h1, data_center_id: 1, pod_id: 1, cluster_id: 1, cpus: 4, cpu_speed_mhz: 2000, total_memory_mb: 8192 }
  - { id: 6, uuid: m6, name: m6, data_center_id: 1, pod_id: 1, cluster_id: 3, hypervisor: baremetal, cpus: 8, cpu_speed_mhz: 2400, total_memory_mb: 65536 }
  - { id: 7, uuid: m7, name: m7, data_center_id: 1, pod_id: 1, cluster_id: 3, hypervisor: baremetal, cpus: 8, cpu_speed_mhz: 2400, total_memory_mb: 65536 }
"#;

fn ordered_by(
    env: &TestEnv,
    planner: &str,
    profile: &VirtualMachineProfile,
    avoid: &mut ExcludeList,
) -> Option<Vec<u64>> {
    let Some(RegisteredPlanner::Cluster(planner)) = env.manager.planner(planner) else {
        panic!("{} is not a registered cluster planner", planner);
    };
    planner.order_clusters(profile, &DeploymentPlan::new(1), avoid)
}

fn cluster_order(env: &TestEnv, profile: &VirtualMachineProfile) -> Option<Vec<u64>> {
    ordered_by(env, "FirstFitPlanner", profile, &mut ExcludeList::new())
}

fn running_on(env: &TestEnv, vm: u64, account: u64, host: u64, mode: Option<ImplicitDedicationMode>) {
    let mut instance = vm_instance(vm, account);
    instance.state = VmState::Running;
    instance.host_id = Some(host);
    instance.implicit_dedication = mode;
    env.inventory.upsert_vm(instance);
}

fn implicitly_dedicated(vm: u64, account: u64, mode: ImplicitDedicationMode) -> VirtualMachineProfile {
    let mut profile = profile(vm, account);
    profile.service_offering.deployment_planner = Some("ImplicitDedicationPlanner".to_string());
    profile.service_offering.implicit_dedication_mode = Some(mode);
    profile
}

fn place(env: &TestEnv, profile: &VirtualMachineProfile, plan: &DeploymentPlan) -> Option<u64> {
    let mut avoid = ExcludeList::new();
    env.manager
        .plan_deployment(profile, plan, &mut avoid, None)
        .unwrap()
        .map(|destination| destination.host_id())
}

#[test]
fn test_clusters_ordered_by_free_capacity() {
    let env = TestEnv::with_config(TWO_CLUSTER_ZONE, thresholds_at(1.0));
    env.inventory.set_host_capacity(cpu_used(1, 5000));

    let profile = profile(100, 7);
    assert_eq!(cluster_order(&env, &profile), Some(vec![2, 1]));

    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .expect("an idle cluster is available");
    assert_eq!(destination.host_id(), 2);
    assert_eq!(destination.cluster.id, 2);
    assert_eq!(destination.volume_pool_ids().get(&1000), Some(&2));
}

#[test]
fn test_last_host_is_preferred_over_planner_order() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    // The planner alone would pick cluster 1
    env.inventory.set_host_capacity(cpu_used(2, 2000));

    let mut profile = profile(100, 7);
    profile.vm.last_host_id = Some(2);

    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 2);
    assert_eq!(destination.volume_pool_ids().get(&1000), Some(&2));

    profile.params.consider_last_host = false;
    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 1);
}

#[test]
fn test_last_host_with_other_guest_os_category_is_skipped() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory
        .update_host(2, |h| h.guest_os_category = Some(4))
        .unwrap();

    let mut profile = profile(100, 7);
    profile.vm.last_host_id = Some(2);
    profile.template.guest_os_category = Some(9);

    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 1);
}

#[test]
fn test_encrypted_volume_on_host_without_encryption() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    for pool in [1, 2] {
        env.inventory
            .update_pool(pool, |p| p.supports_encryption = true)
            .unwrap();
    }
    let mut profile = profile(100, 7);
    profile.volumes[0].has_passphrase = true;

    // Pinned host: rejected and recorded, no fallback search
    let mut avoid = ExcludeList::new();
    let host = env.deps.inventory.find_host(1).unwrap();
    let plan = DeploymentPlan::for_host(&host);
    let result = env
        .manager
        .plan_deployment(&profile, &plan, &mut avoid, None)
        .unwrap();
    assert!(result.is_none());
    assert!(avoid.contains_host(1));

    // Open search: every host is rejected and both clusters are spent
    let mut avoid = ExcludeList::new();
    let result = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap();
    assert!(result.is_none());
    assert!(avoid.contains_host(1) && avoid.contains_host(2));
    assert!(avoid.contains_cluster(1) && avoid.contains_cluster(2));

    // Once a host supports encryption it is chosen
    env.inventory
        .update_host(2, |h| h.volume_encryption = true)
        .unwrap();
    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 2);
}

#[test]
fn test_pinned_host_in_avoid_set_returns_none() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    let host = env.deps.inventory.find_host(2).unwrap();
    let mut avoid = ExcludeList::new();
    avoid.add_host(2);

    let result = env
        .manager
        .plan_deployment(&profile(100, 7), &DeploymentPlan::for_host(&host), &mut avoid, None)
        .unwrap();
    assert!(result.is_none());
    assert!(!avoid.contains_host(1));
}

#[test]
fn test_pinned_host_is_used_when_it_fits() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    let host = env.deps.inventory.find_host(2).unwrap();
    let mut avoid = ExcludeList::new();

    let destination = env
        .manager
        .plan_deployment(&profile(100, 7), &DeploymentPlan::for_host(&host), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 2);
    assert_eq!(destination.volume_pool_ids().get(&1000), Some(&2));
}

#[test]
fn test_cluster_is_kept_while_its_shared_pools_remain_usable() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    let mut profile = profile(100, 7);
    // Local storage nobody has
    profile
        .volumes
        .push(volume(1001, VolumeKind::DataDisk, 5, true));

    let mut avoid = ExcludeList::new();
    let result = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap();
    assert!(result.is_none());
    assert!(!avoid.contains_cluster(1));
    assert!(!avoid.contains_cluster(2));
}

#[test]
fn test_cluster_without_usable_pools_is_avoided() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    let mut profile = profile(100, 7);
    profile
        .volumes
        .push(volume(1001, VolumeKind::DataDisk, 5, true));

    // Shared pools are spent; the clusters have no local pools at all
    let mut avoid = ExcludeList::new();
    avoid.add_pools([1, 2]);
    let result = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap();
    assert!(result.is_none());
    assert!(avoid.contains_cluster(1));
    assert!(avoid.contains_cluster(2));
}

#[test]
fn test_cluster_over_threshold_is_removed() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    // 6000 used + 2000 requested over 8000 crosses 0.85
    env.inventory.set_host_capacity(cpu_used(2, 6000));

    let profile = profile(100, 7);
    assert_eq!(cluster_order(&env, &profile), Some(vec![1]));
}

#[test]
fn test_threshold_is_ignored_when_disabled_for_a_non_deploying_check() {
    let mut config = BerthConfig::test();
    config.planner.cluster_threshold_enabled = false;
    let env = TestEnv::with_config(TWO_CLUSTER_ZONE, config);
    env.inventory.set_host_capacity(cpu_used(2, 6000));

    let mut profile = profile(100, 7);
    // Still filtered while the VM is actually being deployed
    assert_eq!(cluster_order(&env, &profile), Some(vec![1]));

    profile.params.deploy_vm = false;
    assert_eq!(cluster_order(&env, &profile), Some(vec![1, 2]));
}

#[test]
fn test_no_cluster_with_capacity_gives_up() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    let mut profile = profile(100, 7);
    profile.service_offering = offering(4, 2000, 16384);

    assert_eq!(cluster_order(&env, &profile), None);
    let mut avoid = ExcludeList::new();
    assert!(env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .is_none());
}

#[test]
fn test_user_dispersing_spreads_account_vms() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    let mut running = vm_instance(50, 7);
    running.state = VmState::Running;
    running.host_id = Some(1);
    env.inventory.upsert_vm(running);

    let mut profile = profile(100, 7);
    profile.service_offering.deployment_planner = Some("UserDispersingPlanner".to_string());

    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 2);

    // Another account's VM is not dispersed away from host 1
    let mut other = profile.clone();
    other.vm = vm_instance(101, 8);
    other.owner = account(8);
    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&other, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 1);
}

#[test]
fn test_implicit_dedication_claims_an_empty_host() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    let mut shared_vm = vm_instance(50, 8);
    shared_vm.state = VmState::Running;
    shared_vm.host_id = Some(1);
    env.inventory.upsert_vm(shared_vm);

    let mut dedicated = profile(100, 7);
    dedicated.service_offering.deployment_planner = Some("ImplicitDedicationPlanner".to_string());
    dedicated.service_offering.implicit_dedication_mode = Some(ImplicitDedicationMode::Strict);

    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&dedicated, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 2);

    let row = env
        .manager
        .ledger()
        .store()
        .find_host_reservation(2)
        .unwrap()
        .unwrap();
    assert_eq!(row.resource_usage, Some(ResourceUsage::Dedicated));

    // A shared VM can no longer land on the dedicated host
    env.inventory
        .update_host(1, |h| h.resource_state = HostResourceState::Disabled)
        .unwrap();
    let mut avoid = ExcludeList::new();
    let result = env
        .manager
        .plan_deployment(&profile(101, 8), &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap();
    assert!(result.is_none());
    assert!(avoid.contains_host(2));
}

#[test]
fn test_bare_metal_vm_gets_a_whole_host() {
    let yaml = r#"
data_centers:
  - { id: 1, name: zone1 }
pods:
  - { id: 1, name: pod1, data_center_id: 1 }
clusters:
  - { id: 1, name: kvm, data_center_id: 1, pod_id: 1 }
  - { id: 3, name: metal, data_center_id: 1, pod_id: 1, hypervisor: baremetal }
hosts:
  - { id: 1, uuid: h1, name: h1, data_center_id: 1, pod_id: 1, cluster_id: 1, cpus: 4, cpu_speed_mhz: 2000, total_memory_mb: 8192 }
  - { id: 5, uuid: m5, name: m5, data_center_id: 1, pod_id: 1, cluster_id: 3, hypervisor: baremetal, status: down, cpus: 8, cpu_speed_mhz: 2400, total_memory_mb: 65536 }
  - { id: 6, uuid: m6, name: m6, data_center_id: 1, pod_id: 1, cluster_id: 3, hypervisor: baremetal, cpus: 8, cpu_speed_mhz: 2400, total_memory_mb: 65536 }
"#;
    let env = TestEnv::new(yaml);
    let mut profile = profile(100, 7);
    profile.vm.hypervisor = HypervisorType::BareMetal;

    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 6);
    assert!(destination.storage_for_volumes.is_empty());

    avoid.add_host(6);
    assert!(env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .is_none());
}

#[test]
fn test_unregistered_planner_yields_none() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    let mut profile = profile(100, 7);
    profile.service_offering.deployment_planner = Some("NoSuchPlanner".to_string());

    let mut avoid = ExcludeList::new();
    let result = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_explicit_planner_overrides_offering() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    let mut profile = profile(100, 7);
    profile.service_offering.deployment_planner = Some("NoSuchPlanner".to_string());
    let explicit = env.manager.planner("FirstFitPlanner").cloned();

    // The first fit planner only handles requests naming it or the default
    let mut avoid = ExcludeList::new();
    let result = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, explicit.as_ref())
        .unwrap();
    assert!(result.is_none());

    profile.service_offering.deployment_planner = None;
    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, explicit.as_ref())
        .unwrap();
    assert!(destination.is_some());
}

#[test]
fn test_pod_allocation_orders_clusters_pod_by_pod() {
    let mut config = thresholds_at(1.0);
    config.planner.apply_allocation_at_pods = true;
    let env = TestEnv::with_config(TWO_POD_ZONE, config);
    env.inventory.set_host_capacity(cpu_used(1, 5000));

    let profile = profile(100, 7);
    assert_eq!(cluster_order(&env, &profile), Some(vec![2, 1]));

    let mut avoid = ExcludeList::new();
    avoid.add_pod(2);
    assert_eq!(
        ordered_by(&env, "FirstFitPlanner", &profile, &mut avoid),
        Some(vec![1])
    );
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(2));
}

#[test]
fn test_offering_host_tag_keeps_only_tagged_clusters() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory
        .update_host(2, |h| h.tags = vec!["ssd".to_string()])
        .unwrap();

    let mut profile = profile(100, 7);
    profile.service_offering.host_tag = Some("ssd".to_string());
    assert_eq!(cluster_order(&env, &profile), Some(vec![2]));
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(2));

    profile.service_offering.host_tag = Some("nvme".to_string());
    assert_eq!(cluster_order(&env, &profile), Some(vec![]));
}

#[test]
fn test_clusters_of_disabled_pods_and_disabled_clusters_are_dropped() {
    let env = TestEnv::new(TWO_POD_ZONE);
    env.inventory.add_pod(Pod {
        id: 2,
        name: "pod2".to_string(),
        data_center_id: 1,
        allocation_state: AllocationState::Disabled,
    });

    let mut profile = profile(100, 7);
    assert_eq!(cluster_order(&env, &profile), Some(vec![1]));

    env.inventory
        .update_cluster(1, |c| c.allocation_state = AllocationState::Disabled)
        .unwrap();
    assert_eq!(cluster_order(&env, &profile), Some(vec![]));

    // Root admins still see both
    profile.owner.kind = AccountKind::RootAdmin;
    assert_eq!(cluster_order(&env, &profile), Some(vec![1, 2]));
}

#[test]
fn test_gpu_clusters_go_last_unless_a_vgpu_is_requested() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory
        .update_host(1, |h| {
            h.gpu_groups = vec![GpuGroup {
                name: "GRID K1".to_string(),
                vgpu_types: vec![VgpuCapacity {
                    vgpu_type: "K140Q".to_string(),
                    remaining: 2,
                }],
            }]
        })
        .unwrap();

    let mut profile = profile(100, 7);
    assert_eq!(cluster_order(&env, &profile), Some(vec![2, 1]));
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(2));

    profile.service_offering.vgpu = Some(VgpuRequirement {
        gpu_group: "GRID K1".to_string(),
        vgpu_type: "K140Q".to_string(),
    });
    assert_eq!(cluster_order(&env, &profile), Some(vec![1, 2]));
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(1));
}

#[test]
fn test_implicitly_tagged_clusters_go_last() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory
        .update_host(1, |h| h.tags = vec!["GPU".to_string()])
        .unwrap();

    let mut profile = profile(100, 7);
    assert_eq!(cluster_order(&env, &profile), Some(vec![2, 1]));

    // Asking for the tag keeps only its cluster
    profile.service_offering.host_tag = Some("GPU".to_string());
    assert_eq!(cluster_order(&env, &profile), Some(vec![1]));
}

#[test]
fn test_uefi_clusters_go_last_for_legacy_bios_guests() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory
        .update_host(1, |h| h.uefi_enabled = true)
        .unwrap();

    let mut profile = profile(100, 7);
    assert_eq!(cluster_order(&env, &profile), Some(vec![1, 2]));

    profile.params.boot_type = Some(BootType::Bios);
    assert_eq!(cluster_order(&env, &profile), Some(vec![2, 1]));

    profile.params.boot_type = Some(BootType::Uefi);
    assert_eq!(cluster_order(&env, &profile), Some(vec![1, 2]));
}

#[test]
fn test_uefi_guest_rejects_pinned_and_last_hosts_without_uefi() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory
        .update_host(1, |h| h.uefi_enabled = true)
        .unwrap();

    let mut profile = profile(100, 7);
    profile.params.boot_type = Some(BootType::Uefi);

    // Pinned: no fallback to the UEFI host
    let host = env.deps.inventory.find_host(2).unwrap();
    assert_eq!(place(&env, &profile, &DeploymentPlan::for_host(&host)), None);

    // Last host: skipped, the search finds the UEFI host
    profile.vm.last_host_id = Some(2);
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(1));

    profile.params.boot_type = None;
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(2));
}

#[test]
fn test_ha_placement_only_uses_hosts_with_the_ha_tag() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory.set_host_capacity(cpu_used(1, 2000));
    env.inventory
        .update_host(2, |h| {
            h.ha_host = true;
            h.tags = vec!["ha".to_string()];
        })
        .unwrap();

    // Cluster 2 ranks first but its host is kept for HA restarts
    let mut profile = profile(100, 7);
    assert_eq!(cluster_order(&env, &profile), Some(vec![2, 1]));
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(1));

    profile.params.ha_tag = Some("ha".to_string());
    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 2);
    assert!(!avoid.contains_host(2));
}

#[test]
fn test_user_concentrated_pod_keeps_account_vms_together() {
    let env = TestEnv::new(TWO_POD_ZONE);
    running_on(&env, 50, 7, 2, None);

    let mut profile = profile(100, 7);
    profile.service_offering.deployment_planner = Some("UserConcentratedPodPlanner".to_string());
    assert_eq!(
        ordered_by(&env, "UserConcentratedPodPlanner", &profile, &mut ExcludeList::new()),
        Some(vec![2, 1])
    );
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(2));

    // An account without VMs keeps the capacity order
    let mut other = profile.clone();
    other.vm = vm_instance(101, 8);
    other.owner = account(8);
    assert_eq!(place(&env, &other, &DeploymentPlan::new(1)), Some(1));
}

#[test]
fn test_bare_metal_retries_after_host_is_held_for_other_usage() {
    let env = TestEnv::new(BARE_METAL_ZONE);
    assert!(env
        .manager
        .ledger()
        .check_if_host_fits_planner_usage(6, ResourceUsage::Dedicated)
        .unwrap());

    let mut profile = profile(100, 7);
    profile.vm.hypervisor = HypervisorType::BareMetal;

    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 7);
    assert!(avoid.contains_host(6));

    // Both machines held for dedicated use: nothing left
    let ledger = env.manager.ledger();
    ledger.check_host_reservation_release(7).unwrap();
    assert!(ledger
        .check_if_host_fits_planner_usage(7, ResourceUsage::Dedicated)
        .unwrap());
    let mut avoid = ExcludeList::new();
    assert!(env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .is_none());
    assert!(avoid.contains_host(6) && avoid.contains_host(7));
}

#[test]
fn test_strict_implicit_dedication_falls_back_to_an_empty_host() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory
        .update_host(1, |h| h.max_guests = Some(1))
        .unwrap();
    running_on(&env, 50, 7, 1, Some(ImplicitDedicationMode::Strict));

    let profile = implicitly_dedicated(100, 7, ImplicitDedicationMode::Strict);
    let mut avoid = ExcludeList::new();
    assert_eq!(
        ordered_by(&env, "ImplicitDedicationPlanner", &profile, &mut avoid),
        Some(vec![1, 2])
    );
    assert!(!avoid.contains_host(1) && !avoid.contains_host(2));

    // The own host is full, so the empty one is claimed
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(2));
}

#[test]
fn test_implicit_dedication_prefers_own_hosts_over_capacity_order() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory.set_host_capacity(cpu_used(1, 2000));
    running_on(&env, 50, 7, 1, Some(ImplicitDedicationMode::Strict));

    let profile = implicitly_dedicated(100, 7, ImplicitDedicationMode::Strict);
    assert_eq!(
        ordered_by(&env, "ImplicitDedicationPlanner", &profile, &mut ExcludeList::new()),
        Some(vec![1, 2])
    );
    assert_eq!(place(&env, &profile, &DeploymentPlan::new(1)), Some(1));

    // Another account's dedicated host is never offered
    let stranger = implicitly_dedicated(101, 9, ImplicitDedicationMode::Strict);
    let mut avoid = ExcludeList::new();
    assert_eq!(
        ordered_by(&env, "ImplicitDedicationPlanner", &stranger, &mut avoid),
        Some(vec![2])
    );
    assert!(avoid.contains_host(1));
}

#[test]
fn test_preferred_implicit_dedication_falls_back_to_a_shared_host() {
    let env = TestEnv::new(TWO_CLUSTER_ZONE);
    env.inventory
        .update_host(2, |h| h.max_guests = Some(1))
        .unwrap();
    running_on(&env, 50, 7, 2, Some(ImplicitDedicationMode::Preferred));
    running_on(&env, 51, 9, 1, None);

    let profile = implicitly_dedicated(100, 7, ImplicitDedicationMode::Preferred);
    let mut avoid = ExcludeList::new();
    assert_eq!(
        ordered_by(&env, "ImplicitDedicationPlanner", &profile, &mut avoid),
        Some(vec![2, 1])
    );
    assert!(!avoid.contains_host(1));

    let mut avoid = ExcludeList::new();
    let destination = env
        .manager
        .plan_deployment(&profile, &DeploymentPlan::new(1), &mut avoid, None)
        .unwrap()
        .unwrap();
    assert_eq!(destination.host_id(), 1);
    assert!(avoid.contains_host(2));

    let row = env
        .manager
        .ledger()
        .store()
        .find_host_reservation(1)
        .unwrap()
        .unwrap();
    assert_eq!(row.resource_usage, Some(ResourceUsage::Shared));

    // Strict mode never shares
    let strict = implicitly_dedicated(101, 7, ImplicitDedicationMode::Strict);
    assert_eq!(place(&env, &strict, &DeploymentPlan::new(1)), None);
}
