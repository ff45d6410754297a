//! Placement requests and results

use crate::types::{
    Cluster, ClusterId, DataCenter, DataCenterId, Host, HostId, Pod, PodId, PoolId, StoragePool,
    VolumeId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Host priority used when the plan carries no entry for a host
pub const DEFAULT_HOST_PRIORITY: i32 = 0;

/// Hosts with this priority are dropped from candidate lists
pub const PROHIBITED_HOST_PRIORITY: i32 = i32::MIN;

/// Caller context that travels with a plan into the reservation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationContext {
    pub journal_id: Uuid,
    pub caller: Option<String>,
}

/// A placement request.
///
/// Pins narrow the search: a pinned host implies its pod and cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub data_center_id: DataCenterId,
    #[serde(default)]
    pub pod_id: Option<PodId>,
    #[serde(default)]
    pub cluster_id: Option<ClusterId>,
    #[serde(default)]
    pub host_id: Option<HostId>,
    #[serde(default)]
    pub pool_id: Option<PoolId>,
    #[serde(default)]
    pub reservation_context: Option<ReservationContext>,
    #[serde(default)]
    pub host_priorities: HashMap<HostId, i32>,
    /// Hosts affinity processing wants the VM on; empty means no preference
    #[serde(default)]
    pub preferred_hosts: Vec<HostId>,
}

impl DeploymentPlan {
    pub fn new(data_center_id: DataCenterId) -> Self {
        Self {
            data_center_id,
            ..Default::default()
        }
    }

    /// Plan pinned to one host, with pod and cluster taken from it
    pub fn for_host(host: &Host) -> Self {
        Self {
            data_center_id: host.data_center_id,
            pod_id: Some(host.pod_id),
            cluster_id: Some(host.cluster_id),
            host_id: Some(host.id),
            ..Default::default()
        }
    }

    pub fn with_pod(mut self, pod_id: PodId) -> Self {
        self.pod_id = Some(pod_id);
        self
    }

    pub fn with_cluster(mut self, cluster_id: ClusterId) -> Self {
        self.cluster_id = Some(cluster_id);
        self
    }

    pub fn with_pool(mut self, pool_id: PoolId) -> Self {
        self.pool_id = Some(pool_id);
        self
    }

    pub fn with_host_priority(mut self, host_id: HostId, priority: i32) -> Self {
        self.host_priorities.insert(host_id, priority);
        self
    }

    pub fn host_priority(&self, host_id: HostId) -> i32 {
        self.host_priorities
            .get(&host_id)
            .copied()
            .unwrap_or(DEFAULT_HOST_PRIORITY)
    }

    /// Plan scoped to one cluster, carrying the pool pin, reservation context
    /// and host priorities of `self`
    pub fn scoped_to(&self, pod_id: PodId, cluster_id: ClusterId, host_id: Option<HostId>) -> Self {
        Self {
            data_center_id: self.data_center_id,
            pod_id: Some(pod_id),
            cluster_id: Some(cluster_id),
            host_id,
            pool_id: self.pool_id,
            reservation_context: self.reservation_context.clone(),
            host_priorities: self.host_priorities.clone(),
            preferred_hosts: self.preferred_hosts.clone(),
        }
    }
}

/// Where a VM goes: compute location plus the pools still to be prepared.
///
/// Volumes reused on a pool where they are already ready do not appear in
/// `storage_for_volumes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployDestination {
    pub data_center: DataCenter,
    pub pod: Pod,
    pub cluster: Cluster,
    pub host: Host,
    #[serde(default)]
    pub storage_for_volumes: BTreeMap<VolumeId, StoragePool>,
}

impl DeployDestination {
    pub fn host_id(&self) -> HostId {
        self.host.id
    }

    /// Pool id per volume, the form persisted in reservations
    pub fn volume_pool_ids(&self) -> BTreeMap<VolumeId, PoolId> {
        self.storage_for_volumes
            .iter()
            .map(|(volume, pool)| (*volume, pool.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities_default_and_prohibited() {
        let plan = DeploymentPlan::new(1)
            .with_host_priority(3, 10)
            .with_host_priority(4, PROHIBITED_HOST_PRIORITY);

        assert_eq!(plan.host_priority(3), 10);
        assert_eq!(plan.host_priority(4), PROHIBITED_HOST_PRIORITY);
        assert_eq!(plan.host_priority(5), DEFAULT_HOST_PRIORITY);
    }

    #[test]
    fn test_scoped_plan_keeps_pool_and_priorities() {
        let plan = DeploymentPlan::new(1).with_pool(9).with_host_priority(2, 5);
        let scoped = plan.scoped_to(3, 4, None);

        assert_eq!(scoped.pod_id, Some(3));
        assert_eq!(scoped.cluster_id, Some(4));
        assert_eq!(scoped.pool_id, Some(9));
        assert_eq!(scoped.host_priority(2), 5);
    }
}
