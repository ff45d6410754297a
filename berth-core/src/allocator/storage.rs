//! Capacity-ordered storage pool allocators

use super::StoragePoolAllocator;
use crate::exclude_list::ExcludeList;
use crate::plan::DeploymentPlan;
use crate::profile::{DiskProfile, VirtualMachineProfile};
use crate::query::PlannerDependencies;
use crate::types::{HypervisorType, PoolScope, PoolStatus, StoragePool};
use std::sync::Arc;
use tracing::{debug, warn};

pub const LOCAL_STORAGE_POOL_ALLOCATOR: &str = "LocalStoragePoolAllocator";
pub const CLUSTER_SCOPE_STORAGE_POOL_ALLOCATOR: &str = "ClusterScopeStoragePoolAllocator";
pub const ZONE_WIDE_STORAGE_POOL_ALLOCATOR: &str = "ZoneWideStoragePoolAllocator";

/// Which pools an allocator considers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolAllocatorScope {
    /// Host-local pools, for disks that ask for local storage
    Local,
    /// Pools attached to the plan's cluster
    Cluster,
    /// Pools shared by the whole zone
    Zone,
}

/// Returns the pools of one scope with the most free space first
pub struct CapacityOrderPoolAllocator {
    deps: PlannerDependencies,
    scope: PoolAllocatorScope,
}

/// Local, cluster-scope and zone-wide allocators in the order they are asked
pub fn default_pool_allocators(deps: &PlannerDependencies) -> Vec<Arc<dyn StoragePoolAllocator>> {
    vec![
        Arc::new(CapacityOrderPoolAllocator::new(deps.clone(), PoolAllocatorScope::Local)),
        Arc::new(CapacityOrderPoolAllocator::new(deps.clone(), PoolAllocatorScope::Cluster)),
        Arc::new(CapacityOrderPoolAllocator::new(deps.clone(), PoolAllocatorScope::Zone)),
    ]
}

impl CapacityOrderPoolAllocator {
    pub fn new(deps: PlannerDependencies, scope: PoolAllocatorScope) -> Self {
        Self { deps, scope }
    }

    /// Pools of this allocator's scope inside the plan, before any filtering
    fn pools_in_scope(&self, disk: &DiskProfile, plan: &DeploymentPlan) -> Vec<StoragePool> {
        let pools = self.deps.inventory.list_pools(plan.data_center_id);
        match self.scope {
            PoolAllocatorScope::Local => {
                if !disk.use_local_storage {
                    return Vec::new();
                }
                pools
                    .into_iter()
                    .filter(|p| p.scope == PoolScope::Host)
                    .filter(|p| {
                        let Some(host) = p.host_id.and_then(|id| self.deps.inventory.find_host(id))
                        else {
                            return false;
                        };
                        host.is_up()
                            && host.is_enabled()
                            && plan.pod_id.map_or(true, |pod| host.pod_id == pod)
                            && plan.cluster_id.map_or(true, |c| host.cluster_id == c)
                            && plan.host_id.map_or(true, |h| host.id == h)
                    })
                    .collect()
            }
            PoolAllocatorScope::Cluster => {
                if disk.use_local_storage {
                    return Vec::new();
                }
                let Some(pod) = plan.pod_id else {
                    debug!("{} needs a pod in the plan", CLUSTER_SCOPE_STORAGE_POOL_ALLOCATOR);
                    return Vec::new();
                };
                pools
                    .into_iter()
                    .filter(|p| p.scope == PoolScope::Cluster && p.pod_id == Some(pod))
                    .filter(|p| plan.cluster_id.map_or(true, |c| p.cluster_id == Some(c)))
                    .collect()
            }
            PoolAllocatorScope::Zone => {
                if disk.use_local_storage {
                    return Vec::new();
                }
                pools
                    .into_iter()
                    .filter(|p| p.scope == PoolScope::Zone)
                    .filter(|p| p.hypervisor.map_or(true, |hv| hv == disk.hypervisor))
                    .collect()
            }
        }
    }

    fn is_suitable(&self, disk: &DiskProfile, pool: &StoragePool) -> bool {
        if pool.status != PoolStatus::Up {
            debug!("Pool {} is {:?}, skipping", pool.id, pool.status);
            return false;
        }
        if disk.requires_encryption && !pool.supports_encryption {
            debug!("Pool {} does not support encrypted volumes", pool.id);
            return false;
        }
        let disks = std::slice::from_ref(disk);
        if !self.deps.storage.pool_has_enough_iops(disks, pool) {
            debug!("Pool {} does not have enough IOPS for volume {}", pool.id, disk.volume_id);
            return false;
        }
        if !self.deps.storage.pool_has_enough_space(disks, pool) {
            debug!("Pool {} does not have enough space for volume {}", pool.id, disk.volume_id);
            return false;
        }
        if disk.hypervisor == HypervisorType::VMware {
            match self.deps.storage.is_pool_compliant_with_storage_policy(disks, pool) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Pool {} is not compliant with the storage policy", pool.id);
                    return false;
                }
                Err(e) => {
                    warn!("Storage policy check failed for pool {}: {}", pool.id, e);
                    return false;
                }
            }
        }
        true
    }
}

impl StoragePoolAllocator for CapacityOrderPoolAllocator {
    fn name(&self) -> &str {
        match self.scope {
            PoolAllocatorScope::Local => LOCAL_STORAGE_POOL_ALLOCATOR,
            PoolAllocatorScope::Cluster => CLUSTER_SCOPE_STORAGE_POOL_ALLOCATOR,
            PoolAllocatorScope::Zone => ZONE_WIDE_STORAGE_POOL_ALLOCATOR,
        }
    }

    fn allocate_to_pool(
        &self,
        disk: &DiskProfile,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
        return_up_to: usize,
    ) -> Vec<StoragePool> {
        let in_scope = self.pools_in_scope(disk, plan);
        if in_scope.is_empty() {
            return Vec::new();
        }

        let (mut tagged, untagged): (Vec<StoragePool>, Vec<StoragePool>) =
            in_scope.into_iter().partition(|p| p.has_tags(&disk.tags));
        for pool in &untagged {
            debug!("Pool {} lacks tags {:?}, adding to avoid", pool.id, disk.tags);
            avoid.add_pool(pool.id);
        }

        tagged.sort_by(|a, b| b.free_bytes().cmp(&a.free_bytes()).then(a.id.cmp(&b.id)));

        let mut suitable = Vec::new();
        for pool in tagged {
            if suitable.len() >= return_up_to {
                break;
            }
            if avoid.should_avoid(&pool) {
                debug!("Pool {} is in avoid set, skipping", pool.id);
                continue;
            }
            if self.is_suitable(disk, &pool) {
                suitable.push(pool);
            } else {
                avoid.add_pool(pool.id);
            }
        }

        debug!(
            "{} found {} pools for volume {} of VM {}",
            self.name(),
            suitable.len(),
            disk.volume_id,
            profile.id()
        );
        suitable
    }
}
