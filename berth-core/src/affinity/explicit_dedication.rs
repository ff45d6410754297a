//! Explicit dedication: VMs of the group only use resources dedicated to it

use super::{groups_of_kind, AffinityGroupProcessor};
use crate::error::{BerthError, BerthResult};
use crate::exclude_list::ExcludeList;
use crate::plan::{DeployDestination, DeploymentPlan};
use crate::profile::{AffinityGroupKind, VirtualMachineProfile};
use crate::query::{DedicatedResource, DedicatedTarget, PlannerDependencies};
use crate::types::{ClusterId, DataCenterId, Host, HostId, PodId};
use std::collections::BTreeSet;
use tracing::debug;

pub const EXPLICIT_DEDICATION_PROCESSOR: &str = "ExplicitDedicationProcessor";

/// Resources of one zone a dedication group may use
#[derive(Debug, Default)]
struct DedicatedScope {
    whole_zone: bool,
    pods: BTreeSet<PodId>,
    clusters: BTreeSet<ClusterId>,
    hosts: BTreeSet<HostId>,
}

impl DedicatedScope {
    fn is_empty(&self) -> bool {
        !self.whole_zone && self.pods.is_empty() && self.clusters.is_empty() && self.hosts.is_empty()
    }

    fn allows_host(&self, host: &Host) -> bool {
        self.whole_zone
            || self.pods.contains(&host.pod_id)
            || self.clusters.contains(&host.cluster_id)
            || self.hosts.contains(&host.id)
    }
}

pub struct ExplicitDedicationProcessor {
    deps: PlannerDependencies,
}

impl ExplicitDedicationProcessor {
    pub fn new(deps: PlannerDependencies) -> Self {
        Self { deps }
    }

    fn zone_of(&self, target: DedicatedTarget) -> Option<DataCenterId> {
        let inventory = &self.deps.inventory;
        match target {
            DedicatedTarget::Zone(dc) => Some(dc),
            DedicatedTarget::Pod(id) => inventory.find_pod(id).map(|p| p.data_center_id),
            DedicatedTarget::Cluster(id) => inventory.find_cluster(id).map(|c| c.data_center_id),
            DedicatedTarget::Host(id) => inventory.find_host(id).map(|h| h.data_center_id),
        }
    }

    /// Resources dedicated to the VM's groups inside `dc`; an error when a
    /// group owns nothing at all
    fn scope_in_zone(
        &self,
        profile: &VirtualMachineProfile,
        dc: DataCenterId,
    ) -> BerthResult<Option<DedicatedScope>> {
        let mut groups = groups_of_kind(profile, AffinityGroupKind::ExplicitDedication).peekable();
        if groups.peek().is_none() {
            return Ok(None);
        }

        let mut scope = DedicatedScope::default();
        for group in groups {
            let resources: Vec<DedicatedResource> =
                self.deps.dedication.list_by_affinity_group(group.id);
            if resources.is_empty() {
                return Err(BerthError::affinity_conflict(
                    group.name.clone(),
                    "no resources are dedicated to the group",
                ));
            }
            for resource in resources {
                if self.zone_of(resource.target) != Some(dc) {
                    continue;
                }
                match resource.target {
                    DedicatedTarget::Zone(_) => scope.whole_zone = true,
                    DedicatedTarget::Pod(id) => {
                        scope.pods.insert(id);
                    }
                    DedicatedTarget::Cluster(id) => {
                        scope.clusters.insert(id);
                    }
                    DedicatedTarget::Host(id) => {
                        scope.hosts.insert(id);
                    }
                }
            }
        }
        Ok(Some(scope))
    }
}

impl AffinityGroupProcessor for ExplicitDedicationProcessor {
    fn name(&self) -> &str {
        EXPLICIT_DEDICATION_PROCESSOR
    }

    fn kind(&self) -> AffinityGroupKind {
        AffinityGroupKind::ExplicitDedication
    }

    fn process(
        &self,
        profile: &VirtualMachineProfile,
        plan: &mut DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> BerthResult<()> {
        let dc = plan.data_center_id;
        let Some(scope) = self.scope_in_zone(profile, dc)? else {
            return Ok(());
        };

        if scope.is_empty() {
            debug!("No dedicated resources in zone {}, adding it to avoid", dc);
            avoid.add_data_center(dc);
            return Ok(());
        }
        if scope.whole_zone {
            return Ok(());
        }

        let hosts = self.deps.inventory.list_hosts(dc);
        let mut open_clusters = BTreeSet::new();
        let mut open_pods = BTreeSet::new();
        for host in &hosts {
            if scope.allows_host(host) {
                open_clusters.insert(host.cluster_id);
                open_pods.insert(host.pod_id);
            } else {
                avoid.add_host(host.id);
            }
        }
        for cluster in self.deps.inventory.list_clusters(dc) {
            let dedicated = scope.clusters.contains(&cluster.id) || scope.pods.contains(&cluster.pod_id);
            if !dedicated && !open_clusters.contains(&cluster.id) {
                avoid.add_cluster(cluster.id);
            }
        }
        for pod in self.deps.inventory.list_pods(dc) {
            if !scope.pods.contains(&pod.id) && !open_pods.contains(&pod.id) {
                avoid.add_pod(pod.id);
            }
        }
        debug!(
            "VM {} restricted to dedicated resources in zone {}: {}",
            profile.id(),
            dc,
            avoid
        );
        Ok(())
    }

    fn check(
        &self,
        profile: &VirtualMachineProfile,
        destination: &DeployDestination,
    ) -> BerthResult<bool> {
        match self.scope_in_zone(profile, destination.data_center.id)? {
            None => Ok(true),
            Some(scope) => Ok(scope.allows_host(&destination.host)),
        }
    }
}
