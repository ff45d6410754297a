//! Capacity-ordered cluster planner and its per-account variants

use super::{
    is_requested_planner, ClusterPlanner, DeploymentPlanner, FIRST_FIT_PLANNER,
    USER_CONCENTRATED_POD_PLANNER, USER_DISPERSING_PLANNER,
};
use crate::capacity::{CapacityRequest, CapacityType};
use crate::config::PlannerConfig;
use crate::exclude_list::ExcludeList;
use crate::plan::DeploymentPlan;
use crate::profile::VirtualMachineProfile;
use crate::query::{CapacityScope, PlannerDependencies};
use crate::types::{AllocationState, ClusterId, HostId, PodId};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// How the capacity order is adjusted for the VM's owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterHeuristic {
    /// Most aggregate headroom first
    CapacityOrder,
    /// Spread an account's VMs: clusters holding few of them first
    UserDispersing,
    /// Keep an account's VMs together: pods already holding them first
    UserConcentratedPod,
}

/// Orders candidate clusters by aggregate free capacity, then drops the ones
/// that are avoided, disabled, over their capacity threshold or lacking the
/// offering's host tags.
pub struct FirstFitPlanner {
    deps: PlannerDependencies,
    config: PlannerConfig,
    name: &'static str,
    heuristic: ClusterHeuristic,
}

impl FirstFitPlanner {
    pub fn new(deps: PlannerDependencies, config: PlannerConfig) -> Self {
        Self::with_heuristic(deps, config, FIRST_FIT_PLANNER, ClusterHeuristic::CapacityOrder)
    }

    pub fn user_dispersing(deps: PlannerDependencies, config: PlannerConfig) -> Self {
        Self::with_heuristic(
            deps,
            config,
            USER_DISPERSING_PLANNER,
            ClusterHeuristic::UserDispersing,
        )
    }

    pub fn user_concentrated_pod(deps: PlannerDependencies, config: PlannerConfig) -> Self {
        Self::with_heuristic(
            deps,
            config,
            USER_CONCENTRATED_POD_PLANNER,
            ClusterHeuristic::UserConcentratedPod,
        )
    }

    pub(crate) fn with_heuristic(
        deps: PlannerDependencies,
        config: PlannerConfig,
        name: &'static str,
        heuristic: ClusterHeuristic,
    ) -> Self {
        Self {
            deps,
            config,
            name,
            heuristic,
        }
    }

    pub fn heuristic(&self) -> ClusterHeuristic {
        self.heuristic
    }

    pub(crate) fn deps(&self) -> &PlannerDependencies {
        &self.deps
    }

    pub(crate) fn order_candidate_clusters(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> Option<Vec<ClusterId>> {
        let dc = plan.data_center_id;
        if avoid.contains_data_center(dc) {
            debug!("Zone {} is in avoid set, giving up", dc);
            return None;
        }

        if let Some(cluster_id) = plan.cluster_id {
            let Some(cluster) = self.deps.inventory.find_cluster(cluster_id) else {
                debug!("Cluster {} in the plan does not exist", cluster_id);
                return None;
            };
            if avoid.should_avoid(&cluster) {
                debug!("Cluster {} in the plan is in avoid set", cluster_id);
                return Some(Vec::new());
            }
            return Some(vec![cluster_id]);
        }

        if let Some(pod_id) = plan.pod_id {
            let Some(pod) = self.deps.inventory.find_pod(pod_id) else {
                debug!("Pod {} in the plan does not exist", pod_id);
                return None;
            };
            if avoid.should_avoid(&pod) {
                debug!("Pod {} in the plan is in avoid set", pod_id);
                return Some(Vec::new());
            }
            return self.scan_clusters(CapacityScope::Pod(pod_id), profile, plan, avoid);
        }

        if self.config.apply_allocation_at_pods {
            self.scan_pods(profile, plan, avoid)
        } else {
            self.scan_clusters(CapacityScope::Zone(dc), profile, plan, avoid)
        }
    }

    fn scan_pods(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> Option<Vec<ClusterId>> {
        let dc = plan.data_center_id;
        let request = CapacityRequest::for_offering(&profile.service_offering);
        let with_capacity = self
            .deps
            .capacity
            .list_pods_with_enough_host_capacity(dc, request);
        if with_capacity.is_empty() {
            debug!("No pod in zone {} has a host with enough capacity", dc);
            return None;
        }

        let ranking = self
            .deps
            .capacity
            .order_pods_by_aggregate_capacity(dc, self.config.host_capacity_type_to_order);
        let pods: Vec<PodId> = ranking
            .ordered
            .into_iter()
            .filter(|p| with_capacity.contains(p))
            .collect();
        let pods = self.apply_pod_heuristic(pods, profile);

        let mut clusters = Vec::new();
        for pod_id in pods {
            let Some(pod) = self.deps.inventory.find_pod(pod_id) else {
                continue;
            };
            if avoid.should_avoid(&pod) {
                debug!("Pod {} is in avoid set, skipping", pod_id);
                continue;
            }
            if pod.allocation_state == AllocationState::Disabled && !profile.owner.is_root_admin() {
                debug!("Pod {} is disabled, skipping", pod_id);
                continue;
            }
            if let Some(found) = self.scan_clusters(CapacityScope::Pod(pod_id), profile, plan, avoid) {
                clusters.extend(found);
            }
        }
        Some(clusters)
    }

    fn scan_clusters(
        &self,
        scope: CapacityScope,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> Option<Vec<ClusterId>> {
        let request = CapacityRequest::for_offering(&profile.service_offering);
        let with_capacity = self
            .deps
            .capacity
            .list_clusters_with_enough_host_capacity(scope, request);
        if with_capacity.is_empty() {
            debug!("No cluster in {:?} has a host with enough capacity", scope);
            return None;
        }

        let ranking = self
            .deps
            .capacity
            .order_clusters_by_aggregate_capacity(scope, self.config.host_capacity_type_to_order);
        let ordered: Vec<ClusterId> = ranking
            .ordered
            .into_iter()
            .filter(|c| with_capacity.contains(c))
            .collect();
        debug!("Clusters ordered by aggregate capacity: {:?}", ordered);

        let ordered = self.apply_cluster_heuristic(ordered, profile, scope);
        let filtered = self.remove_unusable_clusters(ordered, profile, plan, avoid);
        Some(self.reorder_for_specialized_hosts(filtered, profile))
    }

    fn remove_unusable_clusters(
        &self,
        mut clusters: Vec<ClusterId>,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &ExcludeList,
    ) -> Vec<ClusterId> {
        let inventory = &self.deps.inventory;

        clusters.retain(|id| match inventory.find_cluster(*id) {
            Some(cluster) if avoid.should_avoid(&cluster) => {
                debug!("Cluster {} is in avoid set, removing", id);
                false
            }
            Some(_) => true,
            None => false,
        });

        if !profile.owner.is_root_admin() {
            clusters.retain(|id| {
                let disabled = inventory.find_cluster(*id).is_some_and(|cluster| {
                    cluster.allocation_state == AllocationState::Disabled
                        || inventory
                            .find_pod(cluster.pod_id)
                            .is_some_and(|pod| pod.allocation_state == AllocationState::Disabled)
                });
                if disabled {
                    debug!("Cluster {} or its pod is disabled, removing", id);
                }
                !disabled
            });
        }

        if self.config.cluster_threshold_enabled || profile.params.deploy_vm {
            let request = CapacityRequest::for_offering(&profile.service_offering);
            let mut crossing: BTreeSet<ClusterId> = BTreeSet::new();
            for (kind, threshold) in [
                (CapacityType::Cpu, self.config.cluster_cpu_disable_threshold),
                (CapacityType::Memory, self.config.cluster_memory_disable_threshold),
            ] {
                crossing.extend(self.deps.capacity.list_clusters_crossing_threshold(
                    kind,
                    plan.data_center_id,
                    threshold,
                    request.amount(kind),
                ));
            }
            if !crossing.is_empty() {
                debug!("Removing clusters crossing capacity thresholds: {:?}", crossing);
                clusters.retain(|id| !crossing.contains(id));
            }
        }

        let host_tags = profile.service_offering.host_tags();
        if !host_tags.is_empty() {
            let tagged = self.deps.tags.list_clusters_by_host_tag(&host_tags);
            clusters.retain(|id| {
                let keep = tagged.contains(id);
                if !keep {
                    debug!("Cluster {} has no host tagged {:?}, removing", id, host_tags);
                }
                keep
            });
        }

        clusters
    }

    /// Push clusters with GPU, implicitly tagged or UEFI hosts back when the
    /// VM does not need them
    fn reorder_for_specialized_hosts(
        &self,
        mut clusters: Vec<ClusterId>,
        profile: &VirtualMachineProfile,
    ) -> Vec<ClusterId> {
        let skip_gpu = profile.service_offering.vgpu.is_none();
        let legacy_bios = profile.is_legacy_bios();
        if clusters.len() < 2 || (!skip_gpu && !legacy_bios) {
            return clusters;
        }

        let offering_tags = profile.service_offering.host_tags();
        let implicit_tags: Vec<String> = self
            .config
            .implicit_host_tags
            .iter()
            .filter(|t| !offering_tags.contains(t))
            .cloned()
            .collect();

        let mut weights: HashMap<ClusterId, (usize, usize, usize)> = HashMap::new();
        for id in &clusters {
            let hosts = self.deps.inventory.list_hosts_in_cluster(*id);
            let host_ids: Vec<HostId> = hosts.iter().map(|h| h.id).collect();
            let tag_count = if implicit_tags.is_empty() {
                0
            } else {
                self.deps
                    .tags
                    .distinct_implicit_host_tags(&host_ids, &implicit_tags)
                    .len()
            };
            let gpu_hosts = if skip_gpu {
                hosts.iter().filter(|h| h.has_gpu()).count()
            } else {
                0
            };
            let uefi_hosts = if legacy_bios {
                hosts.iter().filter(|h| h.uefi_enabled).count()
            } else {
                0
            };
            weights.insert(*id, (tag_count, gpu_hosts, uefi_hosts));
        }

        clusters.sort_by_key(|id| weights.get(id).copied().unwrap_or_default());
        debug!("Clusters after specialized host reordering: {:?}", clusters);
        clusters
    }

    /// Active VMs of the owner per cluster and per pod
    fn account_footprint(
        &self,
        profile: &VirtualMachineProfile,
    ) -> (HashMap<ClusterId, usize>, HashMap<PodId, usize>, usize) {
        let mut per_cluster = HashMap::new();
        let mut per_pod = HashMap::new();
        let mut total = 0;
        for vm in self
            .deps
            .vms
            .list_by_account(profile.vm.data_center_id, profile.owner.id)
        {
            if vm.id == profile.id() || !vm.state.is_active() {
                continue;
            }
            let Some(host) = vm.host_id.and_then(|h| self.deps.inventory.find_host(h)) else {
                continue;
            };
            *per_cluster.entry(host.cluster_id).or_insert(0) += 1;
            *per_pod.entry(host.pod_id).or_insert(0) += 1;
            total += 1;
        }
        (per_cluster, per_pod, total)
    }

    fn apply_cluster_heuristic(
        &self,
        clusters: Vec<ClusterId>,
        profile: &VirtualMachineProfile,
        scope: CapacityScope,
    ) -> Vec<ClusterId> {
        match self.heuristic {
            ClusterHeuristic::CapacityOrder => clusters,
            ClusterHeuristic::UserDispersing => {
                let (per_cluster, _, total) = self.account_footprint(profile);
                disperse(clusters, &per_cluster, total, self.config.user_dispersion_weight)
            }
            ClusterHeuristic::UserConcentratedPod => {
                if !matches!(scope, CapacityScope::Zone(_)) {
                    return clusters;
                }
                let (_, per_pod, _) = self.account_footprint(profile);
                let pods = concentrate(per_pod.keys().copied().collect(), &per_pod);
                let pod_of: HashMap<ClusterId, PodId> = clusters
                    .iter()
                    .filter_map(|id| self.deps.inventory.find_cluster(*id).map(|c| (c.id, c.pod_id)))
                    .collect();
                let mut ordered = Vec::with_capacity(clusters.len());
                for pod in &pods {
                    ordered.extend(clusters.iter().filter(|c| pod_of.get(*c) == Some(pod)));
                }
                ordered.extend(
                    clusters
                        .iter()
                        .filter(|c| pod_of.get(*c).map_or(true, |pod| !pods.contains(pod))),
                );
                ordered
            }
        }
    }

    fn apply_pod_heuristic(&self, pods: Vec<PodId>, profile: &VirtualMachineProfile) -> Vec<PodId> {
        match self.heuristic {
            ClusterHeuristic::CapacityOrder => pods,
            ClusterHeuristic::UserDispersing => {
                let (_, per_pod, total) = self.account_footprint(profile);
                disperse(pods, &per_pod, total, self.config.user_dispersion_weight)
            }
            ClusterHeuristic::UserConcentratedPod => {
                let (_, per_pod, _) = self.account_footprint(profile);
                let held: Vec<PodId> = pods
                    .iter()
                    .copied()
                    .filter(|p| per_pod.contains_key(p))
                    .collect();
                let mut ordered = concentrate(held, &per_pod);
                ordered.extend(pods.into_iter().filter(|p| !per_pod.contains_key(p)));
                ordered
            }
        }
    }
}

/// Blend of the owner's VM share and the capacity rank, lowest first
fn disperse(ids: Vec<u64>, vm_counts: &HashMap<u64, usize>, total: usize, weight: f64) -> Vec<u64> {
    if total == 0 || ids.len() < 2 {
        return ids;
    }
    let len = ids.len() as f64;
    let mut scored: Vec<(u64, f64)> = ids
        .into_iter()
        .enumerate()
        .map(|(rank, id)| {
            let vm_share = vm_counts.get(&id).copied().unwrap_or(0) as f64 / total as f64;
            let rank_share = rank as f64 / len;
            (id, weight * vm_share + (1.0 - weight) * rank_share)
        })
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    debug!("Ids ordered by account dispersion: {:?}", scored);
    scored.into_iter().map(|(id, _)| id).collect()
}

/// Ids holding the most of the owner's VMs first
fn concentrate(mut ids: Vec<u64>, vm_counts: &HashMap<u64, usize>) -> Vec<u64> {
    ids.sort_by(|a, b| {
        let ca = vm_counts.get(a).copied().unwrap_or(0);
        let cb = vm_counts.get(b).copied().unwrap_or(0);
        cb.cmp(&ca).then(a.cmp(b))
    });
    ids
}

impl DeploymentPlanner for FirstFitPlanner {
    fn name(&self) -> &str {
        self.name
    }

    fn can_handle(
        &self,
        profile: &VirtualMachineProfile,
        _plan: &DeploymentPlan,
        _avoid: &ExcludeList,
    ) -> bool {
        !profile.is_bare_metal()
            && is_requested_planner(self.name, profile, self.config.default_planner_name())
    }
}

impl ClusterPlanner for FirstFitPlanner {
    #[tracing::instrument(skip_all, fields(planner = self.name, vm_id = profile.id()))]
    fn order_clusters(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> Option<Vec<ClusterId>> {
        self.order_candidate_clusters(profile, plan, avoid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disperse_prefers_clusters_without_account_vms() {
        let counts = HashMap::from([(1, 3), (2, 0), (3, 1)]);
        assert_eq!(disperse(vec![1, 2, 3], &counts, 4, 1.0), vec![2, 3, 1]);
        // Weight zero keeps the capacity order
        assert_eq!(disperse(vec![1, 2, 3], &counts, 4, 0.0), vec![1, 2, 3]);
    }

    #[test]
    fn test_concentrate_orders_by_vm_count() {
        let counts = HashMap::from([(5, 1), (6, 4)]);
        assert_eq!(concentrate(vec![5, 6], &counts), vec![6, 5]);
    }
}
