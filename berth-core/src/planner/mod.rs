//! Deployment planners
//!
//! A cluster planner orders the clusters the manager should try; the manager
//! then asks allocators for hosts and pools inside each one. A direct planner
//! returns a finished destination on its own. Planners are registered by name
//! and resolved per request from the caller, the service offering or the
//! configured default.

mod bare_metal;
mod first_fit;
mod implicit_dedication;

pub use bare_metal::BareMetalPlanner;
pub use first_fit::{ClusterHeuristic, FirstFitPlanner};
pub use implicit_dedication::ImplicitDedicationPlanner;

use crate::exclude_list::ExcludeList;
use crate::error::BerthResult;
use crate::plan::{DeployDestination, DeploymentPlan};
use crate::profile::VirtualMachineProfile;
use crate::query::InventoryQuery;
use crate::reservation::ResourceUsage;
use crate::types::{ClusterId, Host, StoragePool, VolumeId};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const FIRST_FIT_PLANNER: &str = "FirstFitPlanner";
pub const USER_DISPERSING_PLANNER: &str = "UserDispersingPlanner";
pub const USER_CONCENTRATED_POD_PLANNER: &str = "UserConcentratedPodPlanner";
pub const IMPLICIT_DEDICATION_PLANNER: &str = "ImplicitDedicationPlanner";
pub const BARE_METAL_PLANNER: &str = "BareMetalPlanner";

pub trait DeploymentPlanner: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &ExcludeList,
    ) -> bool;

    /// Tenancy mode hosts chosen by this planner are held in
    fn resource_usage(
        &self,
        _profile: &VirtualMachineProfile,
        _plan: &DeploymentPlan,
        _avoid: &ExcludeList,
    ) -> ResourceUsage {
        ResourceUsage::Shared
    }
}

pub trait ClusterPlanner: DeploymentPlanner {
    /// Candidate clusters, best first. `None` gives up on the request; an
    /// empty list means every candidate was filtered out.
    fn order_clusters(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> Option<Vec<ClusterId>>;
}

pub trait DirectPlanner: DeploymentPlanner {
    fn plan(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
    ) -> BerthResult<Option<DeployDestination>>;
}

/// A planner as the manager's registry holds it
#[derive(Clone)]
pub enum RegisteredPlanner {
    Cluster(Arc<dyn ClusterPlanner>),
    Direct(Arc<dyn DirectPlanner>),
}

impl RegisteredPlanner {
    pub fn name(&self) -> &str {
        match self {
            RegisteredPlanner::Cluster(p) => p.name(),
            RegisteredPlanner::Direct(p) => p.name(),
        }
    }

    pub fn can_handle(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &ExcludeList,
    ) -> bool {
        match self {
            RegisteredPlanner::Cluster(p) => p.can_handle(profile, plan, avoid),
            RegisteredPlanner::Direct(p) => p.can_handle(profile, plan, avoid),
        }
    }

    pub fn resource_usage(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &ExcludeList,
    ) -> ResourceUsage {
        match self {
            RegisteredPlanner::Cluster(p) => p.resource_usage(profile, plan, avoid),
            RegisteredPlanner::Direct(p) => p.resource_usage(profile, plan, avoid),
        }
    }
}

impl std::fmt::Debug for RegisteredPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisteredPlanner::Cluster(p) => write!(f, "Cluster({})", p.name()),
            RegisteredPlanner::Direct(p) => write!(f, "Direct({})", p.name()),
        }
    }
}

/// Whether the planner named `name` is the one this request asks for: the
/// offering's planner when it names one, otherwise the configured default
pub(crate) fn is_requested_planner(
    name: &str,
    profile: &VirtualMachineProfile,
    default_planner: &str,
) -> bool {
    match profile.service_offering.deployment_planner.as_deref() {
        Some(requested) => requested == name,
        None => default_planner == name,
    }
}

/// Assemble a destination from a host and its volume pools
pub(crate) fn build_destination(
    inventory: &dyn InventoryQuery,
    host: Host,
    storage_for_volumes: BTreeMap<VolumeId, StoragePool>,
) -> Option<DeployDestination> {
    let data_center = inventory.find_data_center(host.data_center_id)?;
    let pod = inventory.find_pod(host.pod_id)?;
    let cluster = inventory.find_cluster(host.cluster_id)?;
    Some(DeployDestination {
        data_center,
        pod,
        cluster,
        host,
        storage_for_volumes,
    })
}
