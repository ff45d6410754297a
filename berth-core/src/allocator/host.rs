//! First-fit host allocator

use super::{host_reached_max_guest_limit, HostAllocator, HostType};
use crate::capacity::{host_has_cpu_capability, CapacityRequest, HostCapacity, OvercommitRatios};
use crate::config::{AllocationAlgorithm, PlannerConfig};
use crate::exclude_list::ExcludeList;
use crate::plan::DeploymentPlan;
use crate::profile::VirtualMachineProfile;
use crate::query::PlannerDependencies;
use crate::types::{Host, HostId};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const FIRST_FIT_ALLOCATOR: &str = "FirstFitAllocator";

/// Walks the hosts of a plan's scope in the configured order and returns
/// those with the tags, devices and free capacity the VM needs.
pub struct FirstFitAllocator {
    deps: PlannerDependencies,
    config: PlannerConfig,
}

impl FirstFitAllocator {
    pub fn new(deps: PlannerDependencies, config: PlannerConfig) -> Self {
        Self { deps, config }
    }

    /// Up and enabled hosts of the VM's hypervisor inside the plan's scope
    fn hosts_in_scope(&self, profile: &VirtualMachineProfile, plan: &DeploymentPlan) -> Vec<Host> {
        self.deps
            .inventory
            .list_hosts(plan.data_center_id)
            .into_iter()
            .filter(|h| plan.pod_id.map_or(true, |pod| h.pod_id == pod))
            .filter(|h| plan.cluster_id.map_or(true, |cluster| h.cluster_id == cluster))
            .filter(|h| plan.host_id.map_or(true, |host| h.id == host))
            .filter(|h| h.hypervisor == profile.hypervisor())
            .filter(|h| h.is_up() && h.is_enabled())
            .collect()
    }

    fn order_hosts(&self, mut hosts: Vec<Host>, profile: &VirtualMachineProfile) -> Vec<Host> {
        match self.config.allocation_algorithm {
            AllocationAlgorithm::Random => {
                hosts.shuffle(&mut rand::thread_rng());
            }
            AllocationAlgorithm::FirstFit | AllocationAlgorithm::UserConcentratedPod => {}
            AllocationAlgorithm::FirstFitLeastConsumed => {
                let kind = self.config.host_capacity_type_to_order;
                let mut used: HashMap<HostId, f64> = HashMap::new();
                for host in &hosts {
                    let capacity = self
                        .deps
                        .capacity
                        .host_capacity(host.id)
                        .unwrap_or_else(|| HostCapacity::idle(host));
                    used.insert(host.id, capacity.record(kind).utilization_with(1.0, 0));
                }
                hosts.sort_by(|a, b| {
                    let ua = used.get(&a.id).copied().unwrap_or(1.0);
                    let ub = used.get(&b.id).copied().unwrap_or(1.0);
                    ua.partial_cmp(&ub).unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            AllocationAlgorithm::UserDispersing => {
                let mut per_host: HashMap<HostId, usize> = HashMap::new();
                for vm in self
                    .deps
                    .vms
                    .list_by_account(profile.vm.data_center_id, profile.owner.id)
                {
                    if let Some(host) = vm.host_id.filter(|_| vm.state.is_active()) {
                        *per_host.entry(host).or_default() += 1;
                    }
                }
                hosts.sort_by_key(|h| per_host.get(&h.id).copied().unwrap_or(0));
            }
        }
        hosts
    }

    /// Matching guest OS category first, uncategorised next, other categories
    /// last; GPU hosts go to the end for offerings without a vGPU.
    fn prioritize_hosts(&self, hosts: Vec<Host>, profile: &VirtualMachineProfile) -> Vec<Host> {
        let wanted = profile.template.guest_os_category;
        let (mut matching, mut uncategorised, mut other) = (Vec::new(), Vec::new(), Vec::new());
        for host in hosts {
            match (wanted, host.guest_os_category) {
                (Some(w), Some(h)) if w == h => matching.push(host),
                (_, Some(_)) => other.push(host),
                (_, None) => uncategorised.push(host),
            }
        }
        matching.append(&mut uncategorised);
        matching.append(&mut other);

        if profile.service_offering.vgpu.is_none() {
            let (gpu, mut plain): (Vec<Host>, Vec<Host>) =
                matching.into_iter().partition(Host::has_gpu);
            plain.extend(gpu);
            return plain;
        }
        matching
    }

    fn is_suitable(
        &self,
        host: &Host,
        profile: &VirtualMachineProfile,
        request: CapacityRequest,
        avoid: &ExcludeList,
    ) -> bool {
        if avoid.should_avoid(host) {
            debug!("Host {} is in avoid set, skipping", host.id);
            return false;
        }
        if host_reached_max_guest_limit(self.deps.vms.as_ref(), host) {
            debug!("Host {} reached its max guest limit", host.id);
            return false;
        }
        if let Some(vgpu) = &profile.service_offering.vgpu {
            if !host.has_vgpu_capacity(&vgpu.gpu_group, &vgpu.vgpu_type) {
                debug!(
                    "Host {} has no free vGPU {} in group {}",
                    host.id, vgpu.vgpu_type, vgpu.gpu_group
                );
                return false;
            }
        }
        if !host_has_cpu_capability(host, &profile.service_offering) {
            debug!("Host {} lacks CPU capability for the offering", host.id);
            return false;
        }
        let ratios = self
            .deps
            .inventory
            .find_cluster(host.cluster_id)
            .map(|c| OvercommitRatios::from(&c))
            .unwrap_or_default();
        let capacity = self
            .deps
            .capacity
            .host_capacity(host.id)
            .unwrap_or_else(|| HostCapacity::idle(host));
        if !capacity.has_capacity(request, false, ratios, true) {
            debug!("Host {} does not have enough free capacity", host.id);
            return false;
        }
        true
    }
}

impl HostAllocator for FirstFitAllocator {
    fn name(&self) -> &str {
        FIRST_FIT_ALLOCATOR
    }

    fn allocate_to(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        host_type: HostType,
        avoid: &mut ExcludeList,
        return_up_to: usize,
    ) -> Vec<Host> {
        if host_type != HostType::Routing {
            return Vec::new();
        }

        let in_scope = self.hosts_in_scope(profile, plan);
        let mut required_tags = profile.service_offering.host_tags();
        required_tags.extend(profile.template.template_tag.iter().cloned());

        let candidates: Vec<Host> = match &profile.params.ha_tag {
            Some(ha_tag) => in_scope
                .iter()
                .filter(|h| h.tags.contains(ha_tag))
                .cloned()
                .collect(),
            None => in_scope
                .iter()
                .filter(|h| !h.ha_host && h.has_tags(&required_tags))
                .cloned()
                .collect(),
        };

        let candidate_ids: HashSet<HostId> = candidates.iter().map(|h| h.id).collect();
        for host in in_scope.iter().filter(|h| !h.ha_host && !candidate_ids.contains(&h.id)) {
            debug!("Host {} does not match the required host tags, adding to avoid", host.id);
            avoid.add_host(host.id);
        }

        if candidates.is_empty() {
            debug!(
                "No hosts in dc {} pod {:?} cluster {:?} match VM {}",
                plan.data_center_id,
                plan.pod_id,
                plan.cluster_id,
                profile.id()
            );
            return Vec::new();
        }

        let ordered = self.order_hosts(candidates, profile);
        let prioritized = self.prioritize_hosts(ordered, profile);
        let request = CapacityRequest::for_offering(&profile.service_offering);

        let mut suitable = Vec::new();
        for host in prioritized {
            if suitable.len() >= return_up_to {
                break;
            }
            if self.is_suitable(&host, profile, request, avoid) {
                suitable.push(host);
            } else {
                avoid.add_host(host.id);
            }
        }

        debug!(
            "{} found {} suitable hosts for VM {}",
            FIRST_FIT_ALLOCATOR,
            suitable.len(),
            profile.id()
        );
        suitable
    }
}
