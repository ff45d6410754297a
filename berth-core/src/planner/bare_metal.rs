//! Bare-metal placement: the VM takes a whole physical host

use super::{build_destination, DeploymentPlanner, DirectPlanner, BARE_METAL_PLANNER};
use crate::capacity::{host_has_cpu_capability, CapacityRequest, HostCapacity, OvercommitRatios};
use crate::error::BerthResult;
use crate::exclude_list::ExcludeList;
use crate::plan::{DeployDestination, DeploymentPlan};
use crate::profile::VirtualMachineProfile;
use crate::query::PlannerDependencies;
use crate::types::{Host, HypervisorType};
use std::collections::BTreeMap;
use tracing::debug;

/// Picks the first free bare-metal host of the zone. Bare-metal VMs boot from
/// the network, so the destination carries no volume pools.
pub struct BareMetalPlanner {
    deps: PlannerDependencies,
}

impl BareMetalPlanner {
    pub fn new(deps: PlannerDependencies) -> Self {
        Self { deps }
    }

    fn is_candidate(
        &self,
        host: &Host,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &ExcludeList,
    ) -> bool {
        if host.hypervisor != HypervisorType::BareMetal || !host.is_up() || !host.is_enabled() {
            return false;
        }
        if plan.pod_id.is_some_and(|pod| host.pod_id != pod)
            || plan.cluster_id.is_some_and(|cluster| host.cluster_id != cluster)
            || plan.host_id.is_some_and(|id| host.id != id)
        {
            return false;
        }
        if avoid.should_avoid(host) {
            return false;
        }
        if !host.has_tags(&profile.service_offering.host_tags()) {
            debug!("Bare-metal host {} lacks the offering's tags", host.id);
            return false;
        }
        if !host_has_cpu_capability(host, &profile.service_offering) {
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
        let request = CapacityRequest::for_offering(&profile.service_offering);
        capacity.has_capacity(request, false, ratios, true)
    }
}

impl DeploymentPlanner for BareMetalPlanner {
    fn name(&self) -> &str {
        BARE_METAL_PLANNER
    }

    fn can_handle(
        &self,
        profile: &VirtualMachineProfile,
        _plan: &DeploymentPlan,
        _avoid: &ExcludeList,
    ) -> bool {
        profile.is_bare_metal()
    }
}

impl DirectPlanner for BareMetalPlanner {
    fn plan(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> BerthResult<Option<DeployDestination>> {
        if avoid.contains_data_center(plan.data_center_id) {
            return Ok(None);
        }

        let host = self
            .deps
            .inventory
            .list_hosts(plan.data_center_id)
            .into_iter()
            .find(|host| self.is_candidate(host, profile, plan, avoid));

        match host {
            Some(host) => {
                debug!("Bare-metal host {} chosen for VM {}", host.id, profile.id());
                Ok(build_destination(
                    self.deps.inventory.as_ref(),
                    host,
                    BTreeMap::new(),
                ))
            }
            None => {
                debug!("No free bare-metal host in zone {}", plan.data_center_id);
                Ok(None)
            }
        }
    }
}
