//! Implicit dedication: an account's VMs get hosts of their own without an
//! explicit dedication

use super::{
    ClusterHeuristic, ClusterPlanner, DeploymentPlanner, FirstFitPlanner,
    IMPLICIT_DEDICATION_PLANNER,
};
use crate::config::PlannerConfig;
use crate::exclude_list::ExcludeList;
use crate::plan::DeploymentPlan;
use crate::profile::VirtualMachineProfile;
use crate::query::PlannerDependencies;
use crate::reservation::ResourceUsage;
use crate::types::{ClusterId, HostId, ImplicitDedicationMode, VmState};
use tracing::debug;

/// How a host relates to the account being placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum HostTenancy {
    /// Only this account's implicitly dedicated VMs run there
    Own,
    /// Nothing runs there
    Empty,
    /// Ordinary shared VMs run there
    Shared,
    /// Another account's implicitly dedicated VMs run there
    Foreign,
}

/// Orders clusters like [`FirstFitPlanner`], then moves clusters holding the
/// account's own hosts first and clusters with empty hosts next. Hosts of
/// other accounts' implicit VMs are avoided, and so are shared hosts in strict
/// mode; in preferred mode shared hosts stay as the last resort.
pub struct ImplicitDedicationPlanner {
    first_fit: FirstFitPlanner,
}

impl ImplicitDedicationPlanner {
    pub fn new(deps: PlannerDependencies, config: PlannerConfig) -> Self {
        Self {
            first_fit: FirstFitPlanner::with_heuristic(
                deps,
                config,
                IMPLICIT_DEDICATION_PLANNER,
                ClusterHeuristic::CapacityOrder,
            ),
        }
    }

    /// Offerings without a mode are strict
    fn mode(profile: &VirtualMachineProfile) -> ImplicitDedicationMode {
        profile
            .service_offering
            .implicit_dedication_mode
            .unwrap_or(ImplicitDedicationMode::Strict)
    }

    fn tenancy(&self, host: HostId, profile: &VirtualMachineProfile) -> HostTenancy {
        let vms = self
            .first_fit
            .deps()
            .vms
            .list_by_host_in_states(host, &VmState::ACTIVE);
        let vms: Vec<_> = vms.into_iter().filter(|vm| vm.id != profile.id()).collect();
        if vms.is_empty() {
            return HostTenancy::Empty;
        }
        if vms
            .iter()
            .any(|vm| vm.implicit_dedication.is_some() && vm.account_id != profile.owner.id)
        {
            return HostTenancy::Foreign;
        }
        if vms.iter().all(|vm| vm.implicit_dedication.is_some()) {
            return HostTenancy::Own;
        }
        HostTenancy::Shared
    }
}

impl DeploymentPlanner for ImplicitDedicationPlanner {
    fn name(&self) -> &str {
        self.first_fit.name()
    }

    fn can_handle(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &ExcludeList,
    ) -> bool {
        self.first_fit.can_handle(profile, plan, avoid)
    }

    fn resource_usage(
        &self,
        profile: &VirtualMachineProfile,
        _plan: &DeploymentPlan,
        _avoid: &ExcludeList,
    ) -> ResourceUsage {
        match Self::mode(profile) {
            ImplicitDedicationMode::Strict => ResourceUsage::Dedicated,
            ImplicitDedicationMode::Preferred => ResourceUsage::Shared,
        }
    }
}

impl ClusterPlanner for ImplicitDedicationPlanner {
    #[tracing::instrument(skip_all, fields(planner = IMPLICIT_DEDICATION_PLANNER, vm_id = profile.id()))]
    fn order_clusters(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> Option<Vec<ClusterId>> {
        let clusters = self.first_fit.order_candidate_clusters(profile, plan, avoid)?;
        let mode = Self::mode(profile);

        let inventory = &self.first_fit.deps().inventory;
        let mut excluded = Vec::new();
        let mut ranked: Vec<(HostTenancy, ClusterId)> = Vec::new();
        for cluster in clusters {
            let mut best: Option<HostTenancy> = None;
            for host in inventory.list_hosts_in_cluster(cluster) {
                let tenancy = self.tenancy(host.id, profile);
                let excluded_here = matches!(
                    (tenancy, mode),
                    (HostTenancy::Foreign, _) | (HostTenancy::Shared, ImplicitDedicationMode::Strict)
                );
                if excluded_here {
                    excluded.push(host.id);
                } else if !avoid.contains_host(host.id) {
                    best = Some(best.map_or(tenancy, |b| b.min(tenancy)));
                }
            }
            match best {
                Some(tenancy) => ranked.push((tenancy, cluster)),
                None => debug!("Cluster {} has no host for implicit dedication", cluster),
            }
        }
        debug!(
            "Implicit dedication ({:?}) for account {}: excluded hosts {:?}",
            mode, profile.owner.id, excluded
        );
        avoid.add_hosts(excluded);

        // Own hosts first, then empty ones, then shared; capacity order within a tier
        ranked.sort_by_key(|(tenancy, _)| *tenancy);
        let usable: Vec<ClusterId> = ranked.into_iter().map(|(_, cluster)| cluster).collect();
        if usable.is_empty() {
            debug!("No cluster left for implicit dedication of account {}", profile.owner.id);
        }
        Some(usable)
    }
}
