//! Reference in-memory inventory
//!
//! [`InMemoryInventory`] implements every collaborator interface the planner
//! consumes. It backs the command-line harness and the test suites, and is safe
//! to share across placement threads: reads take a shared lock, mutations an
//! exclusive one.

mod capacity;
mod snapshot;

pub use snapshot::{GroupMembership, InventorySnapshot, PoolConnection};

use crate::capacity::HostCapacity;
use crate::config::StorageConfig;
use crate::error::{BerthError, BerthResult};
use crate::profile::DiskProfile;
use crate::query::{
    DedicatedResource, DedicatedTarget, DedicationQuery, InventoryQuery, StorageManager, TagQuery,
    VmInstanceQuery,
};
use crate::types::{
    AccountId, AffinityGroupId, Cluster, ClusterId, DataCenter, DataCenterId, Host, HostId, Pod,
    PodId, PoolId, PoolScope, StoragePool, VmInstance, VmInstanceId, VmState,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default)]
struct InventoryState {
    data_centers: BTreeMap<DataCenterId, DataCenter>,
    pods: BTreeMap<PodId, Pod>,
    clusters: BTreeMap<ClusterId, Cluster>,
    hosts: BTreeMap<HostId, Host>,
    capacities: BTreeMap<HostId, HostCapacity>,
    pools: BTreeMap<PoolId, StoragePool>,
    vms: BTreeMap<VmInstanceId, VmInstance>,
    group_members: BTreeMap<AffinityGroupId, BTreeSet<VmInstanceId>>,
    dedicated: Vec<DedicatedResource>,
    disconnected: HashSet<PoolConnection>,
    non_compliant: HashSet<PoolId>,
    policy_failures: HashSet<PoolId>,
}

impl InventoryState {
    fn capacity_of(&self, host: &Host) -> HostCapacity {
        self.capacities
            .get(&host.id)
            .copied()
            .unwrap_or_else(|| HostCapacity::idle(host))
    }

    fn dedicated_target_zone(&self, target: DedicatedTarget) -> Option<DataCenterId> {
        match target {
            DedicatedTarget::Zone(dc) => Some(dc),
            DedicatedTarget::Pod(id) => self.pods.get(&id).map(|p| p.data_center_id),
            DedicatedTarget::Cluster(id) => self.clusters.get(&id).map(|c| c.data_center_id),
            DedicatedTarget::Host(id) => self.hosts.get(&id).map(|h| h.data_center_id),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInventory {
    state: RwLock<InventoryState>,
    storage: StorageConfig,
}

impl InMemoryInventory {
    pub fn new(storage: StorageConfig) -> Self {
        Self {
            state: RwLock::new(InventoryState::default()),
            storage,
        }
    }

    pub fn from_snapshot(snapshot: InventorySnapshot, storage: StorageConfig) -> Self {
        let inventory = Self::new(storage);
        inventory.load(snapshot);
        inventory
    }

    pub fn from_yaml_file(path: impl AsRef<Path>, storage: StorageConfig) -> BerthResult<Self> {
        Ok(Self::from_snapshot(
            InventorySnapshot::from_yaml_file(path)?,
            storage,
        ))
    }

    /// Merge a snapshot into the inventory
    pub fn load(&self, snapshot: InventorySnapshot) {
        let mut state = self.state.write();
        for dc in snapshot.data_centers {
            state.data_centers.insert(dc.id, dc);
        }
        for pod in snapshot.pods {
            state.pods.insert(pod.id, pod);
        }
        for cluster in snapshot.clusters {
            state.clusters.insert(cluster.id, cluster);
        }
        for host in snapshot.hosts {
            state.hosts.insert(host.id, host);
        }
        for capacity in snapshot.host_capacities {
            state.capacities.insert(capacity.host_id, capacity);
        }
        for pool in snapshot.pools {
            state.pools.insert(pool.id, pool);
        }
        for vm in snapshot.vms {
            state.vms.insert(vm.id, vm);
        }
        for group in snapshot.affinity_groups {
            state
                .group_members
                .entry(group.group_id)
                .or_default()
                .extend(group.members);
        }
        state.dedicated.extend(snapshot.dedicated_resources);
        state.disconnected.extend(snapshot.disconnected_pools);
        state.non_compliant.extend(snapshot.non_compliant_pools);
        state.policy_failures.extend(snapshot.policy_check_failures);
    }

    pub fn add_data_center(&self, dc: DataCenter) {
        self.state.write().data_centers.insert(dc.id, dc);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state.write().pods.insert(pod.id, pod);
    }

    pub fn add_cluster(&self, cluster: Cluster) {
        self.state.write().clusters.insert(cluster.id, cluster);
    }

    pub fn add_host(&self, host: Host) {
        self.state.write().hosts.insert(host.id, host);
    }

    pub fn remove_host(&self, id: HostId) -> Option<Host> {
        let mut state = self.state.write();
        state.capacities.remove(&id);
        state.hosts.remove(&id)
    }

    pub fn add_pool(&self, pool: StoragePool) {
        self.state.write().pools.insert(pool.id, pool);
    }

    pub fn set_host_capacity(&self, capacity: HostCapacity) {
        self.state.write().capacities.insert(capacity.host_id, capacity);
    }

    pub fn update_host(&self, id: HostId, update: impl FnOnce(&mut Host)) -> BerthResult<()> {
        let mut state = self.state.write();
        let host = state
            .hosts
            .get_mut(&id)
            .ok_or_else(|| BerthError::not_found(format!("host {}", id)))?;
        update(host);
        Ok(())
    }

    pub fn update_cluster(&self, id: ClusterId, update: impl FnOnce(&mut Cluster)) -> BerthResult<()> {
        let mut state = self.state.write();
        let cluster = state
            .clusters
            .get_mut(&id)
            .ok_or_else(|| BerthError::not_found(format!("cluster {}", id)))?;
        update(cluster);
        Ok(())
    }

    pub fn update_pool(&self, id: PoolId, update: impl FnOnce(&mut StoragePool)) -> BerthResult<()> {
        let mut state = self.state.write();
        let pool = state
            .pools
            .get_mut(&id)
            .ok_or_else(|| BerthError::not_found(format!("pool {}", id)))?;
        update(pool);
        Ok(())
    }

    pub fn upsert_vm(&self, vm: VmInstance) {
        self.state.write().vms.insert(vm.id, vm);
    }

    /// Record a VM state change the way the VM lifecycle component would
    pub fn set_vm_state(
        &self,
        id: VmInstanceId,
        vm_state: VmState,
        host_id: Option<HostId>,
        updated_at: chrono::DateTime<chrono::Utc>,
    ) -> BerthResult<VmInstance> {
        let mut state = self.state.write();
        let vm = state
            .vms
            .get_mut(&id)
            .ok_or_else(|| BerthError::not_found(format!("vm {}", id)))?;
        if vm.host_id.is_some() && host_id.is_none() {
            vm.last_host_id = vm.host_id;
        }
        vm.state = vm_state;
        vm.host_id = host_id;
        vm.updated_at = updated_at;
        debug!("VM {} is now {:?} on host {:?}", id, vm_state, host_id);
        Ok(vm.clone())
    }

    pub fn add_group_member(&self, group: AffinityGroupId, vm: VmInstanceId) {
        self.state
            .write()
            .group_members
            .entry(group)
            .or_default()
            .insert(vm);
    }

    pub fn add_dedicated_resource(&self, resource: DedicatedResource) {
        self.state.write().dedicated.push(resource);
    }

    pub fn disconnect_pool(&self, pool_id: PoolId, host_id: HostId) {
        self.state
            .write()
            .disconnected
            .insert(PoolConnection { pool_id, host_id });
    }

    pub fn mark_pool_non_compliant(&self, pool_id: PoolId) {
        self.state.write().non_compliant.insert(pool_id);
    }

    pub fn fail_policy_checks_for(&self, pool_id: PoolId) {
        self.state.write().policy_failures.insert(pool_id);
    }

    /// Current contents as a snapshot
    pub fn snapshot(&self) -> InventorySnapshot {
        let state = self.state.read();
        InventorySnapshot {
            data_centers: state.data_centers.values().cloned().collect(),
            pods: state.pods.values().cloned().collect(),
            clusters: state.clusters.values().cloned().collect(),
            hosts: state.hosts.values().cloned().collect(),
            host_capacities: state.capacities.values().copied().collect(),
            pools: state.pools.values().cloned().collect(),
            vms: state.vms.values().cloned().collect(),
            affinity_groups: state
                .group_members
                .iter()
                .map(|(group_id, members)| GroupMembership {
                    group_id: *group_id,
                    members: members.iter().copied().collect(),
                })
                .collect(),
            dedicated_resources: state.dedicated.clone(),
            disconnected_pools: state.disconnected.iter().copied().collect(),
            non_compliant_pools: state.non_compliant.iter().copied().collect(),
            policy_check_failures: state.policy_failures.iter().copied().collect(),
        }
    }

    /// Bytes a set of disks adds to a pool; disks already there add nothing
    fn new_bytes_on(disks: &[DiskProfile], pool: &StoragePool) -> u64 {
        disks
            .iter()
            .filter(|d| d.current_pool != Some(pool.id))
            .map(|d| d.size_bytes)
            .sum()
    }
}

impl InventoryQuery for InMemoryInventory {
    fn find_data_center(&self, id: DataCenterId) -> Option<DataCenter> {
        self.state.read().data_centers.get(&id).cloned()
    }

    fn find_pod(&self, id: PodId) -> Option<Pod> {
        self.state.read().pods.get(&id).cloned()
    }

    fn find_cluster(&self, id: ClusterId) -> Option<Cluster> {
        self.state.read().clusters.get(&id).cloned()
    }

    fn find_host(&self, id: HostId) -> Option<Host> {
        self.state.read().hosts.get(&id).cloned()
    }

    fn find_pool(&self, id: PoolId) -> Option<StoragePool> {
        self.state.read().pools.get(&id).cloned()
    }

    fn list_pods(&self, dc: DataCenterId) -> Vec<Pod> {
        self.state
            .read()
            .pods
            .values()
            .filter(|p| p.data_center_id == dc)
            .cloned()
            .collect()
    }

    fn list_clusters(&self, dc: DataCenterId) -> Vec<Cluster> {
        self.state
            .read()
            .clusters
            .values()
            .filter(|c| c.data_center_id == dc)
            .cloned()
            .collect()
    }

    fn list_hosts(&self, dc: DataCenterId) -> Vec<Host> {
        self.state
            .read()
            .hosts
            .values()
            .filter(|h| h.data_center_id == dc)
            .cloned()
            .collect()
    }

    fn list_pools(&self, dc: DataCenterId) -> Vec<StoragePool> {
        self.state
            .read()
            .pools
            .values()
            .filter(|p| p.data_center_id == dc)
            .cloned()
            .collect()
    }

    fn list_hosts_in_cluster(&self, cluster: ClusterId) -> Vec<Host> {
        self.state
            .read()
            .hosts
            .values()
            .filter(|h| h.cluster_id == cluster)
            .cloned()
            .collect()
    }
}

impl TagQuery for InMemoryInventory {
    fn list_clusters_by_host_tag(&self, tags: &[String]) -> Vec<ClusterId> {
        let state = self.state.read();
        let clusters: BTreeSet<ClusterId> = state
            .hosts
            .values()
            .filter(|h| h.has_tags(tags))
            .map(|h| h.cluster_id)
            .collect();
        clusters.into_iter().collect()
    }

    fn distinct_implicit_host_tags(
        &self,
        hosts: &[HostId],
        tag_names: &[String],
    ) -> BTreeSet<String> {
        let state = self.state.read();
        hosts
            .iter()
            .filter_map(|id| state.hosts.get(id))
            .flat_map(|h| h.tags.iter())
            .filter(|t| tag_names.contains(t))
            .cloned()
            .collect()
    }
}

impl DedicationQuery for InMemoryInventory {
    fn find_zone_dedication(&self, dc: DataCenterId) -> Option<DedicatedResource> {
        self.state
            .read()
            .dedicated
            .iter()
            .find(|d| d.target == DedicatedTarget::Zone(dc))
            .cloned()
    }

    fn list_dedicated_in_zone(&self, dc: DataCenterId) -> Vec<DedicatedResource> {
        let state = self.state.read();
        state
            .dedicated
            .iter()
            .filter(|d| !matches!(d.target, DedicatedTarget::Zone(_)))
            .filter(|d| state.dedicated_target_zone(d.target) == Some(dc))
            .cloned()
            .collect()
    }

    fn list_by_affinity_group(&self, group: AffinityGroupId) -> Vec<DedicatedResource> {
        self.state
            .read()
            .dedicated
            .iter()
            .filter(|d| d.affinity_group_id == Some(group))
            .cloned()
            .collect()
    }
}

impl VmInstanceQuery for InMemoryInventory {
    fn find_vm(&self, id: VmInstanceId) -> Option<VmInstance> {
        self.state.read().vms.get(&id).cloned()
    }

    fn list_by_host_in_states(&self, host: HostId, states: &[VmState]) -> Vec<VmInstance> {
        self.state
            .read()
            .vms
            .values()
            .filter(|vm| vm.host_id == Some(host) && states.contains(&vm.state))
            .cloned()
            .collect()
    }

    fn list_migrating_to(&self, host: HostId) -> Vec<VmInstance> {
        self.state
            .read()
            .vms
            .values()
            .filter(|vm| vm.migrating_to == Some(host))
            .cloned()
            .collect()
    }

    fn list_stopped_by_last_host(&self, host: HostId) -> Vec<VmInstance> {
        self.state
            .read()
            .vms
            .values()
            .filter(|vm| {
                vm.state == VmState::Stopped && vm.host_id.is_none() && vm.last_host_id == Some(host)
            })
            .cloned()
            .collect()
    }

    fn list_starting_without_host(&self) -> Vec<VmInstance> {
        self.state
            .read()
            .vms
            .values()
            .filter(|vm| vm.state == VmState::Starting && vm.host_id.is_none())
            .cloned()
            .collect()
    }

    fn list_by_account(&self, dc: DataCenterId, account: AccountId) -> Vec<VmInstance> {
        self.state
            .read()
            .vms
            .values()
            .filter(|vm| vm.data_center_id == dc && vm.account_id == account)
            .cloned()
            .collect()
    }

    fn list_affinity_group_members(&self, group: AffinityGroupId) -> Vec<VmInstanceId> {
        self.state
            .read()
            .group_members
            .get(&group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl StorageManager for InMemoryInventory {
    fn host_can_access_pool(&self, host: &Host, pool: &StoragePool) -> bool {
        let state = self.state.read();
        if state.disconnected.contains(&PoolConnection {
            pool_id: pool.id,
            host_id: host.id,
        }) {
            return false;
        }
        match pool.scope {
            PoolScope::Host => pool.host_id == Some(host.id),
            PoolScope::Cluster => pool.cluster_id == Some(host.cluster_id),
            PoolScope::Zone => {
                pool.data_center_id == host.data_center_id
                    && pool.hypervisor.map_or(true, |hv| hv == host.hypervisor)
            }
        }
    }

    fn pool_has_enough_space(&self, disks: &[DiskProfile], pool: &StoragePool) -> bool {
        let factor = if pool.thin_provisioned && pool.is_shared() {
            self.storage.overprovisioning_factor
        } else {
            1.0
        };
        let usable = pool.capacity_bytes as f64 * factor * self.storage.pool_disable_threshold;
        let requested = Self::new_bytes_on(disks, pool);
        let fits = (pool.used_bytes.saturating_add(requested)) as f64 <= usable;
        if !fits {
            debug!(
                "Pool {} lacks space: used {} + requested {} > usable {:.0}",
                pool.id, pool.used_bytes, requested, usable
            );
        }
        fits
    }

    fn pool_has_enough_iops(&self, disks: &[DiskProfile], pool: &StoragePool) -> bool {
        let Some(capacity) = pool.capacity_iops else {
            return true;
        };
        let requested: u64 = disks
            .iter()
            .filter(|d| d.current_pool != Some(pool.id))
            .filter_map(|d| d.min_iops)
            .sum();
        pool.used_iops.saturating_add(requested) <= capacity
    }

    fn is_pool_compliant_with_storage_policy(
        &self,
        _disks: &[DiskProfile],
        pool: &StoragePool,
    ) -> BerthResult<bool> {
        let state = self.state.read();
        if state.policy_failures.contains(&pool.id) {
            return Err(BerthError::StoragePolicy {
                pool_id: pool.id,
                message: "storage policy service unavailable".to_string(),
            });
        }
        Ok(!state.non_compliant.contains(&pool.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HostResourceState, HostStatus, HypervisorType, PoolStatus};

    fn host(id: HostId, cluster: ClusterId) -> Host {
        Host {
            id,
            uuid: format!("host-{}", id),
            name: format!("host-{}", id),
            data_center_id: 1,
            pod_id: 1,
            cluster_id: cluster,
            hypervisor: HypervisorType::Kvm,
            status: HostStatus::Up,
            resource_state: HostResourceState::Enabled,
            cpus: 4,
            cpu_speed_mhz: 1000,
            total_memory_mb: 4096,
            tags: vec![],
            ha_host: false,
            max_guests: None,
            volume_encryption: false,
            uefi_enabled: false,
            guest_os_category: None,
            gpu_groups: vec![],
        }
    }

    fn pool(id: PoolId, scope: PoolScope) -> StoragePool {
        StoragePool {
            id,
            uuid: format!("pool-{}", id),
            name: format!("pool-{}", id),
            data_center_id: 1,
            pod_id: Some(1),
            cluster_id: Some(10),
            host_id: None,
            scope,
            status: PoolStatus::Up,
            hypervisor: None,
            tags: vec![],
            capacity_bytes: 1000,
            used_bytes: 0,
            capacity_iops: None,
            used_iops: 0,
            supports_encryption: false,
            thin_provisioned: false,
        }
    }

    fn disk(size: u64, current_pool: Option<PoolId>) -> DiskProfile {
        DiskProfile {
            volume_id: 1,
            kind: crate::profile::VolumeKind::Root,
            size_bytes: size,
            current_pool,
            use_local_storage: false,
            requires_encryption: false,
            tags: vec![],
            hypervisor: HypervisorType::Kvm,
            min_iops: Some(100),
        }
    }

    #[test]
    fn test_pool_access_by_scope() {
        let inventory = InMemoryInventory::default();
        let h1 = host(1, 10);
        let h2 = host(2, 11);
        let cluster_pool = pool(5, PoolScope::Cluster);

        assert!(inventory.host_can_access_pool(&h1, &cluster_pool));
        assert!(!inventory.host_can_access_pool(&h2, &cluster_pool));

        let zone_pool = pool(6, PoolScope::Zone);
        assert!(inventory.host_can_access_pool(&h2, &zone_pool));

        inventory.disconnect_pool(6, 2);
        assert!(!inventory.host_can_access_pool(&h2, &zone_pool));
    }

    #[test]
    fn test_space_respects_threshold_and_existing_volumes() {
        let inventory = InMemoryInventory::new(StorageConfig {
            pool_disable_threshold: 0.8,
            overprovisioning_factor: 2.0,
        });
        let mut p = pool(5, PoolScope::Cluster);
        p.used_bytes = 500;

        assert!(inventory.pool_has_enough_space(&[disk(300, None)], &p));
        assert!(!inventory.pool_has_enough_space(&[disk(301, None)], &p));
        assert!(inventory.pool_has_enough_space(&[disk(5000, Some(5))], &p));

        p.thin_provisioned = true;
        assert!(inventory.pool_has_enough_space(&[disk(1000, None)], &p));
    }

    #[test]
    fn test_iops_and_policy() {
        let inventory = InMemoryInventory::default();
        let mut p = pool(5, PoolScope::Cluster);
        p.capacity_iops = Some(150);
        p.used_iops = 60;
        assert!(!inventory.pool_has_enough_iops(&[disk(1, None)], &p));

        assert!(inventory.is_pool_compliant_with_storage_policy(&[], &p).unwrap());
        inventory.mark_pool_non_compliant(5);
        assert!(!inventory.is_pool_compliant_with_storage_policy(&[], &p).unwrap());
        inventory.fail_policy_checks_for(5);
        assert!(inventory.is_pool_compliant_with_storage_policy(&[], &p).is_err());
    }

    #[test]
    fn test_stopping_vm_records_last_host() {
        let inventory = InMemoryInventory::default();
        inventory.upsert_vm(VmInstance {
            id: 7,
            name: "vm-7".into(),
            vm_type: Default::default(),
            account_id: 1,
            data_center_id: 1,
            hypervisor: HypervisorType::Kvm,
            state: VmState::Running,
            host_id: Some(3),
            last_host_id: None,
            migrating_to: None,
            updated_at: chrono::Utc::now(),
            implicit_dedication: None,
        });

        let vm = inventory
            .set_vm_state(7, VmState::Stopped, None, chrono::Utc::now())
            .unwrap();
        assert_eq!(vm.last_host_id, Some(3));
        assert_eq!(inventory.list_stopped_by_last_host(3).len(), 1);
    }

    #[test]
    fn test_snapshot_yaml_loading() {
        let yaml = r#"
data_centers:
  - { id: 1, name: zone1 }
pods:
  - { id: 1, name: pod1, data_center_id: 1 }
clusters:
  - { id: 10, name: c10, data_center_id: 1, pod_id: 1, hypervisor: kvm }
hosts:
  - { id: 1, uuid: h1, name: h1, data_center_id: 1, pod_id: 1, cluster_id: 10, cpus: 4, cpu_speed_mhz: 1000, total_memory_mb: 4096, tags: [GPU] }
dedicated_resources:
  - { id: 1, target: { kind: host, id: 1 }, domain_id: 2, account_id: 3 }
"#;
        let snapshot = InventorySnapshot::from_yaml_str(yaml).unwrap();
        let inventory = InMemoryInventory::from_snapshot(snapshot, StorageConfig::default());

        assert_eq!(inventory.list_clusters(1).len(), 1);
        assert_eq!(inventory.list_dedicated_in_zone(1).len(), 1);
        assert_eq!(
            inventory.distinct_implicit_host_tags(&[1], &["GPU".to_string()]).len(),
            1
        );
        assert_eq!(inventory.list_clusters_by_host_tag(&["GPU".to_string()]), vec![10]);
    }
}
