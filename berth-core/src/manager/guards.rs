//! Tenancy guards run before any candidate is considered

use super::DeploymentPlanningManager;
use crate::error::{BerthError, BerthResult};
use crate::exclude_list::ExcludeList;
use crate::plan::DeploymentPlan;
use crate::profile::{Account, AffinityGroupKind, VirtualMachineProfile};
use crate::query::{DedicatedResource, DedicatedTarget};
use crate::types::{AffinityGroupId, AllocationState, VmType};
use std::collections::BTreeSet;
use tracing::debug;

/// Whether the resource is dedicated to the account itself or to its domain
fn dedicated_to(resource: &DedicatedResource, account: &Account) -> bool {
    match resource.account_id {
        Some(owner) => owner == account.id,
        None => account.is_in_domain(resource.domain_id),
    }
}

impl DeploymentPlanningManager {
    /// Refuse zones dedicated to someone else and avoid pods, clusters and
    /// hosts dedicated to other tenants
    pub(super) fn check_dedicated_resources(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> BerthResult<()> {
        if !matches!(profile.vm_type(), VmType::User | VmType::DomainRouter) {
            return Ok(());
        }
        let owner = &profile.owner;
        let dc = plan.data_center_id;

        let mut own_groups: BTreeSet<AffinityGroupId> = BTreeSet::new();
        for group in profile
            .affinity_groups
            .iter()
            .filter(|g| g.kind == AffinityGroupKind::ExplicitDedication)
        {
            if group.account_id.is_some_and(|account| account != owner.id) {
                return Err(BerthError::dedication_conflict(
                    profile.id(),
                    format!(
                        "dedication group '{}' belongs to account {:?}, not {}",
                        group.name, group.account_id, owner.id
                    ),
                ));
            }
            own_groups.insert(group.id);
        }
        let usable_by_vm = |resource: &DedicatedResource| {
            dedicated_to(resource, owner)
                || resource
                    .affinity_group_id
                    .is_some_and(|group| own_groups.contains(&group))
        };

        if let Some(zone) = self.deps.dedication.find_zone_dedication(dc) {
            if !usable_by_vm(&zone) && !owner.is_root_admin() {
                return Err(BerthError::zone_unavailable(
                    dc,
                    format!(
                        "zone is dedicated to domain {} account {:?}",
                        zone.domain_id, zone.account_id
                    ),
                ));
            }
        }

        for resource in self.deps.dedication.list_dedicated_in_zone(dc) {
            if usable_by_vm(&resource) {
                continue;
            }
            match resource.target {
                DedicatedTarget::Pod(id) => avoid.add_pod(id),
                DedicatedTarget::Cluster(id) => avoid.add_cluster(id),
                DedicatedTarget::Host(id) => avoid.add_host(id),
                DedicatedTarget::Zone(_) => {}
            }
        }
        debug!("Avoid after dedication check: {}", avoid);
        Ok(())
    }

    /// A disabled zone is an error; disabled pods, clusters and hosts are
    /// avoided unless the configuration lets this VM use them
    pub(super) fn avoid_disabled_resources(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> BerthResult<()> {
        let config = &self.config.planner;
        let permitted = (profile.vm_type().is_used_by_system()
            && config.allow_router_on_disabled_resources)
            || (profile.owner.is_root_admin() && config.allow_admin_vm_on_disabled_resources);
        if permitted {
            debug!("VM {} may use disabled resources", profile.id());
            return Ok(());
        }

        let inventory = &self.deps.inventory;
        let dc = plan.data_center_id;
        let zone = inventory
            .find_data_center(dc)
            .ok_or_else(|| BerthError::zone_unavailable(dc, "zone does not exist"))?;
        if zone.allocation_state == AllocationState::Disabled {
            return Err(BerthError::zone_unavailable(dc, "zone is disabled"));
        }

        avoid.add_pods(
            inventory
                .list_pods(dc)
                .into_iter()
                .filter(|p| p.allocation_state == AllocationState::Disabled)
                .map(|p| p.id),
        );
        avoid.add_clusters(
            inventory
                .list_clusters(dc)
                .into_iter()
                .filter(|c| c.allocation_state == AllocationState::Disabled)
                .map(|c| c.id),
        );
        avoid.add_hosts(
            inventory
                .list_hosts(dc)
                .into_iter()
                .filter(|h| !h.is_enabled())
                .map(|h| h.id),
        );
        Ok(())
    }
}
