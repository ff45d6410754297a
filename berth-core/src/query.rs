//! Read-only collaborator interfaces consumed by the planning core
//!
//! The planner never owns inventory, capacity or VM state. It reads them
//! through these traits, which production wires to its databases and tests
//! wire to [`crate::inventory::InMemoryInventory`].

use crate::capacity::{CapacityRequest, CapacityType, HostCapacity};
use crate::clock::{Clock, SystemClock};
use crate::error::BerthResult;
use crate::profile::DiskProfile;
use crate::types::{
    AccountId, AffinityGroupId, Cluster, ClusterId, DataCenter, DataCenterId, DomainId, Host,
    HostId, Pod, PodId, PoolId, StoragePool, VmInstance, VmInstanceId, VmState,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Scope of an aggregate capacity query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapacityScope {
    Zone(DataCenterId),
    Pod(PodId),
}

/// Ids ordered by aggregate free capacity, most headroom first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapacityRanking {
    pub ordered: Vec<u64>,
    pub capacity: HashMap<u64, f64>,
}

pub trait InventoryQuery: Send + Sync {
    fn find_data_center(&self, id: DataCenterId) -> Option<DataCenter>;
    fn find_pod(&self, id: PodId) -> Option<Pod>;
    fn find_cluster(&self, id: ClusterId) -> Option<Cluster>;
    fn find_host(&self, id: HostId) -> Option<Host>;
    fn find_pool(&self, id: PoolId) -> Option<StoragePool>;

    fn list_pods(&self, dc: DataCenterId) -> Vec<Pod>;
    fn list_clusters(&self, dc: DataCenterId) -> Vec<Cluster>;
    fn list_hosts(&self, dc: DataCenterId) -> Vec<Host>;
    fn list_pools(&self, dc: DataCenterId) -> Vec<StoragePool>;

    fn list_hosts_in_cluster(&self, cluster: ClusterId) -> Vec<Host> {
        self.find_cluster(cluster)
            .map(|c| {
                self.list_hosts(c.data_center_id)
                    .into_iter()
                    .filter(|h| h.cluster_id == cluster)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn list_pools_in_cluster(&self, cluster: ClusterId) -> Vec<StoragePool> {
        self.find_cluster(cluster)
            .map(|c| {
                self.list_pools(c.data_center_id)
                    .into_iter()
                    .filter(|p| {
                        p.cluster_id == Some(cluster)
                            || p.host_id
                                .and_then(|h| self.find_host(h))
                                .is_some_and(|h| h.cluster_id == cluster)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub trait CapacityQuery: Send + Sync {
    fn host_capacity(&self, host: HostId) -> Option<HostCapacity>;

    /// Clusters with at least one host that fits the request on both CPU and
    /// memory
    fn list_clusters_with_enough_host_capacity(
        &self,
        scope: CapacityScope,
        request: CapacityRequest,
    ) -> Vec<ClusterId>;

    fn order_clusters_by_aggregate_capacity(
        &self,
        scope: CapacityScope,
        kind: CapacityType,
    ) -> CapacityRanking;

    /// Clusters whose utilization including `requested` exceeds `threshold`
    /// (or the cluster's own override of it)
    fn list_clusters_crossing_threshold(
        &self,
        kind: CapacityType,
        dc: DataCenterId,
        threshold: f64,
        requested: u64,
    ) -> Vec<ClusterId>;

    fn list_pods_with_enough_host_capacity(
        &self,
        dc: DataCenterId,
        request: CapacityRequest,
    ) -> Vec<PodId>;

    fn order_pods_by_aggregate_capacity(&self, dc: DataCenterId, kind: CapacityType)
        -> CapacityRanking;

    fn list_hosts_with_enough_capacity(
        &self,
        request: CapacityRequest,
        cluster: ClusterId,
    ) -> Vec<HostId>;
}

pub trait TagQuery: Send + Sync {
    /// Clusters containing a host that carries every tag in `tags`
    fn list_clusters_by_host_tag(&self, tags: &[String]) -> Vec<ClusterId>;

    fn distinct_implicit_host_tags(&self, hosts: &[HostId], tag_names: &[String])
        -> BTreeSet<String>;
}

/// Resource an account or domain holds exclusively
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedicatedResource {
    pub id: u64,
    pub target: DedicatedTarget,
    pub domain_id: DomainId,
    #[serde(default)]
    pub account_id: Option<AccountId>,
    #[serde(default)]
    pub affinity_group_id: Option<AffinityGroupId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum DedicatedTarget {
    Zone(DataCenterId),
    Pod(PodId),
    Cluster(ClusterId),
    Host(HostId),
}

pub trait DedicationQuery: Send + Sync {
    fn find_zone_dedication(&self, dc: DataCenterId) -> Option<DedicatedResource>;

    /// Dedicated pods, clusters and hosts inside the zone
    fn list_dedicated_in_zone(&self, dc: DataCenterId) -> Vec<DedicatedResource>;

    fn list_by_affinity_group(&self, group: AffinityGroupId) -> Vec<DedicatedResource>;
}

pub trait VmInstanceQuery: Send + Sync {
    fn find_vm(&self, id: VmInstanceId) -> Option<VmInstance>;

    fn list_by_host_in_states(&self, host: HostId, states: &[VmState]) -> Vec<VmInstance>;

    /// VMs migrating to the host
    fn list_migrating_to(&self, host: HostId) -> Vec<VmInstance>;

    /// Stopped VMs, with no current host, that last ran on the host
    fn list_stopped_by_last_host(&self, host: HostId) -> Vec<VmInstance>;

    fn list_starting_without_host(&self) -> Vec<VmInstance>;

    fn list_by_account(&self, dc: DataCenterId, account: AccountId) -> Vec<VmInstance>;

    fn list_affinity_group_members(&self, group: AffinityGroupId) -> Vec<VmInstanceId>;
}

/// Storage-side checks a pool allocator or the matcher asks for
pub trait StorageManager: Send + Sync {
    fn host_can_access_pool(&self, host: &Host, pool: &StoragePool) -> bool;

    fn pool_has_enough_space(&self, disks: &[DiskProfile], pool: &StoragePool) -> bool;

    fn pool_has_enough_iops(&self, disks: &[DiskProfile], pool: &StoragePool) -> bool;

    /// Hypervisor storage-policy compliance; an error means the check itself
    /// could not run
    fn is_pool_compliant_with_storage_policy(
        &self,
        disks: &[DiskProfile],
        pool: &StoragePool,
    ) -> BerthResult<bool>;
}

/// Collaborators required by planners, allocators and processors
#[derive(Clone)]
pub struct PlannerDependencies {
    pub inventory: Arc<dyn InventoryQuery>,
    pub capacity: Arc<dyn CapacityQuery>,
    pub tags: Arc<dyn TagQuery>,
    pub dedication: Arc<dyn DedicationQuery>,
    pub vms: Arc<dyn VmInstanceQuery>,
    pub storage: Arc<dyn StorageManager>,
    /// Clock abstraction for testability
    pub clock: Arc<dyn Clock>,
}

impl PlannerDependencies {
    /// Wire every collaborator to one value implementing all of them
    pub fn from_source<T>(source: Arc<T>) -> Self
    where
        T: InventoryQuery
            + CapacityQuery
            + TagQuery
            + DedicationQuery
            + VmInstanceQuery
            + StorageManager
            + 'static,
    {
        Self::from_source_with_clock(source, Arc::new(SystemClock::new()))
    }

    /// Same as [`PlannerDependencies::from_source`] with a custom clock
    pub fn from_source_with_clock<T>(source: Arc<T>, clock: Arc<dyn Clock>) -> Self
    where
        T: InventoryQuery
            + CapacityQuery
            + TagQuery
            + DedicationQuery
            + VmInstanceQuery
            + StorageManager
            + 'static,
    {
        Self {
            inventory: source.clone(),
            capacity: source.clone(),
            tags: source.clone(),
            dedication: source.clone(),
            vms: source.clone(),
            storage: source,
            clock,
        }
    }
}

impl std::fmt::Debug for PlannerDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannerDependencies")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
