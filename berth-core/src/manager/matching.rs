//! Pairing candidate hosts with candidate pools

use super::{DeploymentPlanningManager, StorageSelection};
use crate::error::BerthResult;
use crate::exclude_list::ExcludeList;
use crate::plan::{DeployDestination, DeploymentPlan};
use crate::planner::build_destination;
use crate::profile::{DiskProfile, VirtualMachineProfile, Volume};
use crate::reservation::ResourceUsage;
use crate::types::{Host, HypervisorType, PoolId, StoragePool, VolumeId};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

impl DeploymentPlanningManager {
    /// First host, in order, that reaches a pool for every volume and passes
    /// the acceptance checks. Rejected hosts are added to `avoid`.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn find_host_and_pools(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
        hosts: Vec<Host>,
        selection: &StorageSelection,
        needs_encryption: bool,
        usage: ResourceUsage,
    ) -> BerthResult<Option<DeployDestination>> {
        let mut volumes: Vec<&Volume> = profile.volumes.iter().collect();
        volumes.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));

        for host in hosts {
            let assignment = if profile.template.deploy_as_is {
                self.match_single_pool(profile, &host, &volumes, selection)
            } else {
                self.match_pool_per_volume(profile, &host, &volumes, selection)
            };
            let Some(assignment) = assignment else {
                debug!("Host {} cannot reach a pool for every volume", host.id);
                avoid.add_host(host.id);
                continue;
            };

            if !self.host_meets_requirements(profile, plan, &host, needs_encryption) {
                avoid.add_host(host.id);
                continue;
            }

            let host_id = host.id;
            let storage: BTreeMap<VolumeId, StoragePool> = assignment
                .into_iter()
                .filter(|(volume, _)| !selection.ready_and_reused.contains(volume))
                .collect();
            let Some(destination) = build_destination(self.deps.inventory.as_ref(), host, storage)
            else {
                debug!("Host {} has no complete location in the inventory", host_id);
                avoid.add_host(host_id);
                continue;
            };

            if !self.ledger.check_if_host_fits_planner_usage(host_id, usage)? {
                debug!("Host {} is not available for {} usage", host_id, usage);
                avoid.add_host(host_id);
                continue;
            }

            debug!(
                "Host {} with pools {:?} chosen for VM {}",
                host_id,
                destination.volume_pool_ids(),
                profile.id()
            );
            return Ok(Some(destination));
        }
        Ok(None)
    }

    fn host_meets_requirements(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        host: &Host,
        needs_encryption: bool,
    ) -> bool {
        if !plan.preferred_hosts.is_empty() && !plan.preferred_hosts.contains(&host.id) {
            debug!("Host {} is not among the affinity group's hosts", host.id);
            return false;
        }
        if needs_encryption && !host.volume_encryption {
            debug!("Host {} does not support volume encryption", host.id);
            return false;
        }
        if profile.requires_uefi() && !host.uefi_enabled {
            debug!("Host {} cannot boot UEFI guests", host.id);
            return false;
        }
        true
    }

    /// Each volume, largest first, on the first reachable candidate. Pools
    /// taking several volumes are checked again for the combined load.
    fn match_pool_per_volume(
        &self,
        profile: &VirtualMachineProfile,
        host: &Host,
        volumes: &[&Volume],
        selection: &StorageSelection,
    ) -> Option<BTreeMap<VolumeId, StoragePool>> {
        let storage = &self.deps.storage;
        let mut assignment = BTreeMap::new();
        let mut disks_on_pool: HashMap<PoolId, Vec<DiskProfile>> = HashMap::new();

        for volume in volumes {
            let candidates = selection.suitable.get(&volume.id)?;
            let disk = profile.disk_profile(volume);

            let chosen = candidates.iter().find(|pool| {
                if !storage.host_can_access_pool(host, pool) {
                    return false;
                }
                let Some(existing) = disks_on_pool.get(&pool.id) else {
                    return true;
                };
                let mut combined = existing.clone();
                combined.push(disk.clone());
                storage.pool_has_enough_space(&combined, pool)
                    && storage.pool_has_enough_iops(&combined, pool)
                    && self.pool_is_compliant(&combined, pool)
            })?;

            disks_on_pool.entry(chosen.id).or_default().push(disk);
            assignment.insert(volume.id, chosen.clone());
        }
        Some(assignment)
    }

    /// Deploy-as-is templates keep every disk on one pool that is a candidate
    /// for all of them
    fn match_single_pool(
        &self,
        profile: &VirtualMachineProfile,
        host: &Host,
        volumes: &[&Volume],
        selection: &StorageSelection,
    ) -> Option<BTreeMap<VolumeId, StoragePool>> {
        let Some(first) = volumes.first() else {
            return Some(BTreeMap::new());
        };
        let disks: Vec<DiskProfile> = volumes.iter().map(|v| profile.disk_profile(v)).collect();
        let storage = &self.deps.storage;

        let pool = selection
            .suitable
            .get(&first.id)?
            .iter()
            .filter(|pool| {
                volumes.iter().all(|v| {
                    selection
                        .suitable
                        .get(&v.id)
                        .is_some_and(|pools| pools.iter().any(|p| p.id == pool.id))
                })
            })
            .find(|pool| {
                storage.host_can_access_pool(host, pool)
                    && self.pool_is_compliant(&disks, pool)
                    && (disks.len() < 2 || storage.pool_has_enough_space(&disks, pool))
            })?;

        Some(volumes.iter().map(|v| (v.id, pool.clone())).collect())
    }

    /// Storage-policy compliance; only VMware pools carry policies and a
    /// failed check rules the pool out
    fn pool_is_compliant(&self, disks: &[DiskProfile], pool: &StoragePool) -> bool {
        if disks.iter().all(|d| d.hypervisor != HypervisorType::VMware) {
            return true;
        }
        match self.deps.storage.is_pool_compliant_with_storage_policy(disks, pool) {
            Ok(compliant) => compliant,
            Err(e) => {
                warn!("Storage policy check failed for pool {}: {}", pool.id, e);
                false
            }
        }
    }
}
