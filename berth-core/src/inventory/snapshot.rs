//! Serializable inventory snapshots
//!
//! A snapshot is the YAML document the command-line harness and the tests
//! load into an [`super::InMemoryInventory`].

use crate::capacity::HostCapacity;
use crate::error::BerthResult;
use crate::query::DedicatedResource;
use crate::types::{
    AffinityGroupId, Cluster, DataCenter, Host, HostId, Pod, PoolId, StoragePool, VmInstance,
    VmInstanceId,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySnapshot {
    pub data_centers: Vec<DataCenter>,
    pub pods: Vec<Pod>,
    pub clusters: Vec<Cluster>,
    pub hosts: Vec<Host>,
    /// Hosts without an entry are treated as idle
    pub host_capacities: Vec<HostCapacity>,
    pub pools: Vec<StoragePool>,
    pub vms: Vec<VmInstance>,
    pub affinity_groups: Vec<GroupMembership>,
    pub dedicated_resources: Vec<DedicatedResource>,
    /// Host/pool pairs whose storage connection is down
    pub disconnected_pools: Vec<PoolConnection>,
    /// Pools the hypervisor storage policy rejects
    pub non_compliant_pools: Vec<PoolId>,
    /// Pools whose storage policy check cannot run
    pub policy_check_failures: Vec<PoolId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: AffinityGroupId,
    pub members: Vec<VmInstanceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolConnection {
    pub pool_id: PoolId,
    pub host_id: HostId,
}

impl InventorySnapshot {
    pub fn from_yaml_str(content: &str) -> BerthResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> BerthResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> BerthResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
