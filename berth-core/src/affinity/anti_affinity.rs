//! Host anti-affinity: members of a group never share a host

use super::{groups_of_kind, AffinityGroupProcessor};
use crate::error::BerthResult;
use crate::exclude_list::ExcludeList;
use crate::plan::{DeployDestination, DeploymentPlan};
use crate::profile::{AffinityGroupKind, VirtualMachineProfile};
use crate::query::PlannerDependencies;
use crate::reservation::ReservationStore;
use crate::types::{HostId, VmInstanceId, VmState};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub const HOST_ANTI_AFFINITY_PROCESSOR: &str = "HostAntiAffinityProcessor";

pub struct HostAntiAffinityProcessor {
    deps: PlannerDependencies,
    store: Arc<dyn ReservationStore>,
    grace_window: chrono::Duration,
}

impl HostAntiAffinityProcessor {
    pub fn new(
        deps: PlannerDependencies,
        store: Arc<dyn ReservationStore>,
        grace_window: chrono::Duration,
    ) -> Self {
        Self {
            deps,
            store,
            grace_window,
        }
    }

    fn other_members(&self, profile: &VirtualMachineProfile) -> BTreeSet<VmInstanceId> {
        groups_of_kind(profile, AffinityGroupKind::HostAntiAffinity)
            .flat_map(|group| self.deps.vms.list_affinity_group_members(group.id))
            .filter(|member| *member != profile.id())
            .collect()
    }

    /// Hosts a member occupies: its current host, the host of its pending
    /// reservation, or the last host of a member stopped inside the grace
    /// window
    fn hosts_of_member(&self, member: VmInstanceId) -> BerthResult<Vec<HostId>> {
        let mut hosts = Vec::new();
        if let Some(vm) = self.deps.vms.find_vm(member) {
            if let Some(host) = vm.host_id {
                hosts.push(host);
            } else if vm.state == VmState::Stopped {
                let stopped_for = self.deps.clock.now() - vm.updated_at;
                if let Some(last) = vm.last_host_id.filter(|_| stopped_for < self.grace_window) {
                    hosts.push(last);
                }
            }
        }
        if let Some(reservation) = self.store.find_vm_reservation(member)? {
            hosts.push(reservation.host_id);
        }
        Ok(hosts)
    }
}

impl AffinityGroupProcessor for HostAntiAffinityProcessor {
    fn name(&self) -> &str {
        HOST_ANTI_AFFINITY_PROCESSOR
    }

    fn kind(&self) -> AffinityGroupKind {
        AffinityGroupKind::HostAntiAffinity
    }

    fn process(
        &self,
        profile: &VirtualMachineProfile,
        _plan: &mut DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> BerthResult<()> {
        for member in self.other_members(profile) {
            for host in self.hosts_of_member(member)? {
                debug!(
                    "Adding host {} to avoid, it holds anti-affinity group member VM {}",
                    host, member
                );
                avoid.add_host(host);
            }
        }
        Ok(())
    }

    fn check(
        &self,
        profile: &VirtualMachineProfile,
        destination: &DeployDestination,
    ) -> BerthResult<bool> {
        let host = destination.host_id();
        for member in self.other_members(profile) {
            let current = self.deps.vms.find_vm(member).and_then(|vm| vm.host_id);
            let reserved = self.store.find_vm_reservation(member)?.map(|r| r.host_id);
            if current == Some(host) || reserved == Some(host) {
                debug!(
                    "Destination host {} conflicts with anti-affinity group member VM {}",
                    host, member
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}
