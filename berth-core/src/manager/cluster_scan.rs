//! Walking the clusters a planner ordered

use super::DeploymentPlanningManager;
use crate::allocator::{HostType, RETURN_UPTO_ALL};
use crate::error::BerthResult;
use crate::exclude_list::ExcludeList;
use crate::plan::{DeployDestination, DeploymentPlan, PROHIBITED_HOST_PRIORITY};
use crate::profile::VirtualMachineProfile;
use crate::reservation::ResourceUsage;
use crate::types::{Cluster, ClusterId, Host};
use tracing::debug;

impl DeploymentPlanningManager {
    /// Try each cluster in order and return the first destination found
    pub(super) fn check_clusters_for_destination(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
        clusters: &[ClusterId],
        needs_encryption: bool,
        usage: ResourceUsage,
    ) -> BerthResult<Option<DeployDestination>> {
        for &cluster_id in clusters {
            let Some(cluster) = self.deps.inventory.find_cluster(cluster_id) else {
                debug!("Cluster {} vanished from the inventory", cluster_id);
                continue;
            };
            if cluster.hypervisor != profile.hypervisor() {
                debug!(
                    "Cluster {} runs {:?}, VM needs {:?}, adding it to avoid",
                    cluster.id,
                    cluster.hypervisor,
                    profile.hypervisor()
                );
                avoid.add_cluster(cluster.id);
                continue;
            }
            if avoid.contains_pod(cluster.pod_id) {
                debug!("Pod {} of cluster {} is in avoid set", cluster.pod_id, cluster.id);
                continue;
            }

            debug!("Checking cluster {} for VM {}", cluster.id, profile.id());
            let scoped = plan.scoped_to(cluster.pod_id, cluster.id, None);
            let hosts = self.find_suitable_hosts(profile, &scoped, avoid);
            let hosts = Self::apply_host_priorities(hosts, plan);

            if !hosts.is_empty() {
                let selection = self.find_suitable_pools_for_volumes(profile, &scoped, avoid)?;
                if selection.is_complete(profile) {
                    if let Some(destination) = self.find_host_and_pools(
                        profile,
                        &scoped,
                        avoid,
                        hosts,
                        &selection,
                        needs_encryption,
                        usage,
                    )? {
                        return Ok(Some(destination));
                    }
                } else {
                    debug!("No storage for VM {} in cluster {}", profile.id(), cluster.id);
                }
            } else {
                debug!("No suitable hosts in cluster {}", cluster.id);
            }

            if self.can_avoid_cluster(&cluster, profile, avoid) {
                debug!("Nothing left in cluster {}, adding it to avoid", cluster.id);
                avoid.add_cluster(cluster.id);
            }
        }

        debug!("No destination for VM {} in clusters {:?}", profile.id(), clusters);
        Ok(None)
    }

    /// Hosts from the first allocator that returns any
    fn find_suitable_hosts(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> Vec<Host> {
        for allocator in &self.host_allocators {
            let hosts =
                allocator.allocate_to(profile, plan, HostType::Routing, avoid, RETURN_UPTO_ALL);
            if !hosts.is_empty() {
                debug!("{} returned {} hosts", allocator.name(), hosts.len());
                return hosts;
            }
        }
        Vec::new()
    }

    /// Drop prohibited hosts and order the rest by priority, highest first.
    /// The sort is stable so equal priorities keep the allocator's order.
    pub(crate) fn apply_host_priorities(mut hosts: Vec<Host>, plan: &DeploymentPlan) -> Vec<Host> {
        if plan.host_priorities.is_empty() {
            return hosts;
        }
        hosts.retain(|h| plan.host_priority(h.id) != PROHIBITED_HOST_PRIORITY);
        hosts.sort_by_key(|h| std::cmp::Reverse(plan.host_priority(h.id)));
        hosts
    }

    /// A cluster is spent when all its hosts are avoided, or when every pool
    /// of each storage kind the VM needs is avoided. A kind the cluster has no
    /// pools of counts as spent.
    fn can_avoid_cluster(
        &self,
        cluster: &Cluster,
        profile: &VirtualMachineProfile,
        avoid: &ExcludeList,
    ) -> bool {
        let inventory = &self.deps.inventory;
        let all_hosts_avoided = inventory
            .list_hosts_in_cluster(cluster.id)
            .iter()
            .all(|h| avoid.contains_host(h.id));
        if all_hosts_avoided {
            return true;
        }

        let (needs_shared, needs_local) = profile.storage_requirements();
        let pools = inventory.list_pools_in_cluster(cluster.id);
        let all_avoided = |local: bool| {
            pools
                .iter()
                .filter(|p| p.is_local() == local)
                .all(|p| avoid.contains_pool(p.id))
        };
        (!needs_shared || all_avoided(false)) && (!needs_local || all_avoided(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HostResourceState, HostStatus, HypervisorType};

    fn host(id: u64) -> Host {
        Host {
            id,
            uuid: format!("h{}", id),
            name: format!("h{}", id),
            data_center_id: 1,
            pod_id: 1,
            cluster_id: 1,
            hypervisor: HypervisorType::Kvm,
            status: HostStatus::Up,
            resource_state: HostResourceState::Enabled,
            cpus: 4,
            cpu_speed_mhz: 2000,
            total_memory_mb: 8192,
            tags: vec![],
            ha_host: false,
            max_guests: None,
            volume_encryption: false,
            uefi_enabled: false,
            guest_os_category: None,
            gpu_groups: vec![],
        }
    }

    #[test]
    fn test_priorities_drop_prohibited_and_sort_descending() {
        let plan = DeploymentPlan::new(1)
            .with_host_priority(2, PROHIBITED_HOST_PRIORITY)
            .with_host_priority(3, 5)
            .with_host_priority(4, 5);
        let hosts = vec![host(1), host(2), host(3), host(4)];

        let ordered: Vec<u64> = DeploymentPlanningManager::apply_host_priorities(hosts, &plan)
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ordered, vec![3, 4, 1]);
    }

    #[test]
    fn test_no_priorities_keeps_allocator_order() {
        let hosts = vec![host(5), host(2), host(9)];
        let ordered: Vec<u64> =
            DeploymentPlanningManager::apply_host_priorities(hosts, &DeploymentPlan::new(1))
                .into_iter()
                .map(|h| h.id)
                .collect();
        assert_eq!(ordered, vec![5, 2, 9]);
    }
}
