//! Per-volume storage pool resolution

use super::DeploymentPlanningManager;
use crate::allocator::RETURN_UPTO_ALL;
use crate::error::{BerthError, BerthResult};
use crate::exclude_list::ExcludeList;
use crate::plan::DeploymentPlan;
use crate::profile::{VirtualMachineProfile, Volume, VolumeKind, VolumeState};
use crate::types::{AllocationState, PoolId, PoolScope, StoragePool, VolumeId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Candidate pools per volume
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageSelection {
    /// Pools each volume may go to, best first
    pub suitable: BTreeMap<VolumeId, Vec<StoragePool>>,
    /// Volumes already ready on a pool they keep; nothing to prepare for them
    pub ready_and_reused: BTreeSet<VolumeId>,
}

impl StorageSelection {
    pub fn is_empty(&self) -> bool {
        self.suitable.is_empty()
    }

    /// Whether every volume of the VM has at least one pool
    pub fn is_complete(&self, profile: &VirtualMachineProfile) -> bool {
        profile
            .volumes
            .iter()
            .all(|v| self.suitable.get(&v.id).is_some_and(|pools| !pools.is_empty()))
    }

    fn clear(&mut self) {
        self.suitable.clear();
        self.ready_and_reused.clear();
    }
}

impl DeploymentPlanningManager {
    /// Resolve candidate pools for every volume inside the plan's scope.
    ///
    /// Either every volume gets candidates or none does. Pools the allocators
    /// rejected are added to `avoid` unless some volume can still use them.
    pub fn find_suitable_pools_for_volumes(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> BerthResult<StorageSelection> {
        let mut selection = StorageSelection::default();
        if profile.volumes.is_empty() {
            return Ok(selection);
        }
        if !profile.volumes.iter().any(|v| v.kind == VolumeKind::Root) {
            return Err(BerthError::invalid_profile(
                profile.id(),
                "volumes are attached but none is a root volume",
            ));
        }

        let original_pools = avoid.pools().clone();
        let mut rejected: BTreeSet<PoolId> = BTreeSet::new();
        let preferred = self
            .config
            .planner
            .preferred_storage_pool_for(profile.owner.id);

        for volume in &profile.volumes {
            if let Some(pool) = self.reusable_pool(volume, plan, avoid) {
                debug!("Volume {} stays on pool {}", volume.id, pool.id);
                if !matches!(volume.state, VolumeState::Allocated | VolumeState::Creating) {
                    selection.ready_and_reused.insert(volume.id);
                }
                selection.suitable.insert(volume.id, vec![pool]);
                continue;
            }

            if !profile.owner.is_root_admin() && self.allocation_disabled(plan) {
                debug!(
                    "Allocation is disabled in dc {} pod {:?} cluster {:?}",
                    plan.data_center_id, plan.pod_id, plan.cluster_id
                );
                selection.clear();
                return Ok(selection);
            }

            let disk = profile.disk_profile(volume);
            let mut candidates = Vec::new();
            for allocator in &self.pool_allocators {
                let pools = allocator.allocate_to_pool(&disk, profile, plan, avoid, RETURN_UPTO_ALL);
                if !pools.is_empty() {
                    debug!(
                        "{} found {} pools for volume {}",
                        allocator.name(),
                        pools.len(),
                        volume.id
                    );
                    candidates = pools;
                    break;
                }
            }
            // One volume's rejections must not hide pools from the next
            let added = avoid.replace_pools(original_pools.clone());
            rejected.extend(added.difference(&original_pools).copied());

            if candidates.is_empty() {
                debug!(
                    "No pool for volume {} of VM {}, giving up on all volumes",
                    volume.id,
                    profile.id()
                );
                selection.clear();
                avoid.add_pools(rejected);
                return Ok(selection);
            }

            if let Some(uuid) = preferred {
                if let Some(index) = candidates.iter().position(|p| p.uuid == uuid) {
                    let pool = candidates.remove(index);
                    debug!("Preferred pool {} moved first for volume {}", pool.id, volume.id);
                    candidates.insert(0, pool);
                }
            }
            selection.suitable.insert(volume.id, candidates);
        }

        let usable: BTreeSet<PoolId> = selection
            .suitable
            .values()
            .flatten()
            .map(|p| p.id)
            .collect();
        avoid.add_pools(rejected.difference(&usable).copied());
        Ok(selection)
    }

    /// The volume's current (or the plan's pinned) pool, when it can be kept
    fn reusable_pool(
        &self,
        volume: &Volume,
        plan: &DeploymentPlan,
        avoid: &ExcludeList,
    ) -> Option<StoragePool> {
        let ready_on_pool = volume.state == VolumeState::Ready && volume.pool_id.is_some();
        if !ready_on_pool && plan.pool_id.is_none() {
            return None;
        }
        let pool_id = volume.pool_id.or(plan.pool_id)?;
        let pool = self.deps.inventory.find_pool(pool_id)?;

        if pool.is_in_maintenance() {
            debug!("Pool {} of volume {} is in maintenance", pool.id, volume.id);
            return None;
        }
        if avoid.should_avoid(&pool) {
            debug!("Pool {} of volume {} is in avoid set", pool.id, volume.id);
            return None;
        }
        if pool.data_center_id != plan.data_center_id {
            return None;
        }

        let in_scope = match pool.scope {
            PoolScope::Zone => true,
            PoolScope::Cluster => pool.pod_id == plan.pod_id && pool.cluster_id == plan.cluster_id,
            PoolScope::Host => pool
                .host_id
                .and_then(|id| self.deps.inventory.find_host(id))
                .is_some_and(|host| {
                    Some(host.pod_id) == plan.pod_id
                        && Some(host.cluster_id) == plan.cluster_id
                        && plan.host_id.map_or(true, |id| id == host.id)
                }),
        };
        if !in_scope {
            debug!(
                "Pool {} of volume {} is outside the planned scope, allocating another",
                pool.id, volume.id
            );
            return None;
        }
        Some(pool)
    }

    fn allocation_disabled(&self, plan: &DeploymentPlan) -> bool {
        let inventory = &self.deps.inventory;
        let disabled = AllocationState::Disabled;
        inventory
            .find_data_center(plan.data_center_id)
            .is_some_and(|dc| dc.allocation_state == disabled)
            || plan
                .pod_id
                .and_then(|id| inventory.find_pod(id))
                .is_some_and(|pod| pod.allocation_state == disabled)
            || plan
                .cluster_id
                .and_then(|id| inventory.find_cluster(id))
                .is_some_and(|cluster| cluster.allocation_state == disabled)
    }
}
