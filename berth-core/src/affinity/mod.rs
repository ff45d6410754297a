//! Affinity group processors
//!
//! Before the cluster scan each processor narrows the search for the groups of
//! its kind the VM belongs to: it adds hosts to the exclude list or sets the
//! plan's preferred hosts. After a destination is chosen, `check` confirms the
//! destination still honours the group, since group members may have been
//! placed concurrently.

mod anti_affinity;
mod explicit_dedication;
mod host_affinity;

pub use anti_affinity::HostAntiAffinityProcessor;
pub use explicit_dedication::ExplicitDedicationProcessor;
pub use host_affinity::HostAffinityProcessor;

use crate::config::ReservationConfig;
use crate::error::BerthResult;
use crate::exclude_list::ExcludeList;
use crate::plan::{DeployDestination, DeploymentPlan};
use crate::profile::{AffinityGroup, AffinityGroupKind, VirtualMachineProfile};
use crate::query::PlannerDependencies;
use crate::reservation::ReservationStore;
use std::sync::Arc;

pub trait AffinityGroupProcessor: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AffinityGroupKind;

    fn process(
        &self,
        profile: &VirtualMachineProfile,
        plan: &mut DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> BerthResult<()>;

    fn check(&self, profile: &VirtualMachineProfile, destination: &DeployDestination)
        -> BerthResult<bool>;
}

/// Groups of one kind the VM belongs to
pub(crate) fn groups_of_kind(
    profile: &VirtualMachineProfile,
    kind: AffinityGroupKind,
) -> impl Iterator<Item = &AffinityGroup> {
    profile.affinity_groups.iter().filter(move |g| g.kind == kind)
}

/// Anti-affinity, affinity and explicit dedication, in that order
pub fn default_affinity_processors(
    deps: &PlannerDependencies,
    store: Arc<dyn ReservationStore>,
    config: &ReservationConfig,
) -> Vec<Arc<dyn AffinityGroupProcessor>> {
    vec![
        Arc::new(HostAntiAffinityProcessor::new(
            deps.clone(),
            store,
            config.grace_window(),
        )),
        Arc::new(HostAffinityProcessor::new(deps.clone())),
        Arc::new(ExplicitDedicationProcessor::new(deps.clone())),
    ]
}
