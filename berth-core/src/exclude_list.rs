//! Accumulator of resources disqualified during one placement attempt

use crate::types::{
    ClusterId, DataCenterId, HostId, Locatable, PodId, PoolId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Five independent sets of avoided ids.
///
/// Sets only grow while a placement runs. [`ExcludeList::reset`] subtracts
/// another list so that a later stage can re-open resources an earlier stage
/// rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeList {
    data_centers: BTreeSet<DataCenterId>,
    pods: BTreeSet<PodId>,
    clusters: BTreeSet<ClusterId>,
    hosts: BTreeSet<HostId>,
    pools: BTreeSet<PoolId>,
}

impl ExcludeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_data_center(&mut self, id: DataCenterId) {
        self.data_centers.insert(id);
    }

    pub fn add_pod(&mut self, id: PodId) {
        self.pods.insert(id);
    }

    pub fn add_pods(&mut self, ids: impl IntoIterator<Item = PodId>) {
        self.pods.extend(ids);
    }

    pub fn add_cluster(&mut self, id: ClusterId) {
        self.clusters.insert(id);
    }

    pub fn add_clusters(&mut self, ids: impl IntoIterator<Item = ClusterId>) {
        self.clusters.extend(ids);
    }

    pub fn add_host(&mut self, id: HostId) {
        self.hosts.insert(id);
    }

    pub fn add_hosts(&mut self, ids: impl IntoIterator<Item = HostId>) {
        self.hosts.extend(ids);
    }

    pub fn add_pool(&mut self, id: PoolId) {
        self.pools.insert(id);
    }

    pub fn add_pools(&mut self, ids: impl IntoIterator<Item = PoolId>) {
        self.pools.extend(ids);
    }

    pub fn data_centers(&self) -> &BTreeSet<DataCenterId> {
        &self.data_centers
    }

    pub fn pods(&self) -> &BTreeSet<PodId> {
        &self.pods
    }

    pub fn clusters(&self) -> &BTreeSet<ClusterId> {
        &self.clusters
    }

    pub fn hosts(&self) -> &BTreeSet<HostId> {
        &self.hosts
    }

    pub fn pools(&self) -> &BTreeSet<PoolId> {
        &self.pools
    }

    pub fn contains_data_center(&self, id: DataCenterId) -> bool {
        self.data_centers.contains(&id)
    }

    pub fn contains_pod(&self, id: PodId) -> bool {
        self.pods.contains(&id)
    }

    pub fn contains_cluster(&self, id: ClusterId) -> bool {
        self.clusters.contains(&id)
    }

    pub fn contains_host(&self, id: HostId) -> bool {
        self.hosts.contains(&id)
    }

    pub fn contains_pool(&self, id: PoolId) -> bool {
        self.pools.contains(&id)
    }

    /// Whether the entity, or anything above it in the hierarchy, is avoided
    pub fn should_avoid(&self, entity: &impl Locatable) -> bool {
        let location = entity.location();
        location.data_center.is_some_and(|id| self.data_centers.contains(&id))
            || location.pod.is_some_and(|id| self.pods.contains(&id))
            || location.cluster.is_some_and(|id| self.clusters.contains(&id))
            || location.host.is_some_and(|id| self.hosts.contains(&id))
            || location.pool.is_some_and(|id| self.pools.contains(&id))
    }

    /// Remove every id present in `other`
    pub fn reset(&mut self, other: &ExcludeList) {
        self.data_centers.retain(|id| !other.data_centers.contains(id));
        self.pods.retain(|id| !other.pods.contains(id));
        self.clusters.retain(|id| !other.clusters.contains(id));
        self.hosts.retain(|id| !other.hosts.contains(id));
        self.pools.retain(|id| !other.pools.contains(id));
    }

    /// Ids in `self` that are not in `other`
    pub fn difference(&self, other: &ExcludeList) -> ExcludeList {
        ExcludeList {
            data_centers: self.data_centers.difference(&other.data_centers).copied().collect(),
            pods: self.pods.difference(&other.pods).copied().collect(),
            clusters: self.clusters.difference(&other.clusters).copied().collect(),
            hosts: self.hosts.difference(&other.hosts).copied().collect(),
            pools: self.pools.difference(&other.pools).copied().collect(),
        }
    }

    pub(crate) fn replace_pools(&mut self, pools: BTreeSet<PoolId>) -> BTreeSet<PoolId> {
        std::mem::replace(&mut self.pools, pools)
    }

    pub fn is_empty(&self) -> bool {
        self.data_centers.is_empty()
            && self.pods.is_empty()
            && self.clusters.is_empty()
            && self.hosts.is_empty()
            && self.pools.is_empty()
    }
}

impl fmt::Display for ExcludeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dcs={:?} pods={:?} clusters={:?} hosts={:?} pools={:?}",
            self.data_centers, self.pods, self.clusters, self.hosts, self.pools
        )
    }
}
