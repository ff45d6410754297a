//! Host affinity: members of a group share a host

use super::{groups_of_kind, AffinityGroupProcessor};
use crate::error::BerthResult;
use crate::exclude_list::ExcludeList;
use crate::plan::{DeployDestination, DeploymentPlan};
use crate::profile::{AffinityGroupKind, VirtualMachineProfile};
use crate::query::PlannerDependencies;
use crate::types::HostId;
use std::collections::BTreeSet;
use tracing::debug;

pub const HOST_AFFINITY_PROCESSOR: &str = "HostAffinityProcessor";

pub struct HostAffinityProcessor {
    deps: PlannerDependencies,
}

impl HostAffinityProcessor {
    pub fn new(deps: PlannerDependencies) -> Self {
        Self { deps }
    }

    /// Current hosts of the other members, or their last hosts when stopped
    fn member_hosts(&self, profile: &VirtualMachineProfile) -> BTreeSet<HostId> {
        groups_of_kind(profile, AffinityGroupKind::HostAffinity)
            .flat_map(|group| self.deps.vms.list_affinity_group_members(group.id))
            .filter(|member| *member != profile.id())
            .filter_map(|member| self.deps.vms.find_vm(member))
            .filter_map(|vm| vm.host_id.or(vm.last_host_id))
            .collect()
    }
}

impl AffinityGroupProcessor for HostAffinityProcessor {
    fn name(&self) -> &str {
        HOST_AFFINITY_PROCESSOR
    }

    fn kind(&self) -> AffinityGroupKind {
        AffinityGroupKind::HostAffinity
    }

    fn process(
        &self,
        profile: &VirtualMachineProfile,
        plan: &mut DeploymentPlan,
        _avoid: &mut ExcludeList,
    ) -> BerthResult<()> {
        let hosts = self.member_hosts(profile);
        if hosts.is_empty() {
            return Ok(());
        }
        debug!("VM {} prefers affinity group hosts {:?}", profile.id(), hosts);
        for host in hosts {
            if !plan.preferred_hosts.contains(&host) {
                plan.preferred_hosts.push(host);
            }
        }
        Ok(())
    }

    fn check(
        &self,
        profile: &VirtualMachineProfile,
        destination: &DeployDestination,
    ) -> BerthResult<bool> {
        let hosts = self.member_hosts(profile);
        Ok(hosts.is_empty() || hosts.contains(&destination.host_id()))
    }
}
