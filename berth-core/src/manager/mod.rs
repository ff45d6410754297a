//! Deployment planning manager
//!
//! Orchestrates one placement request: tenancy guards, the fixed-host and
//! last-host fast paths, affinity processing and finally the planner-driven
//! cluster scan. Every rejection along the way is recorded in the caller's
//! exclude list; only malformed tenancy or affinity state is an error.
//!
//! The steps live in submodules as further `impl` blocks:
//! - `guards`: dedication and disabled-resource checks
//! - `fast_path`: fixed host, last host and VM reservation reuse
//! - `cluster_scan`: walking the clusters a planner ordered
//! - `storage`: per-volume pool resolution
//! - `matching`: pairing candidate hosts with candidate pools

mod cluster_scan;
mod fast_path;
mod guards;
mod matching;
mod storage;

pub use storage::StorageSelection;

use crate::affinity::{default_affinity_processors, AffinityGroupProcessor};
use crate::allocator::{default_pool_allocators, FirstFitAllocator, HostAllocator, StoragePoolAllocator};
use crate::config::BerthConfig;
use crate::error::BerthResult;
use crate::exclude_list::ExcludeList;
use crate::plan::{DeployDestination, DeploymentPlan};
use crate::planner::{
    BareMetalPlanner, FirstFitPlanner, ImplicitDedicationPlanner, RegisteredPlanner,
};
use crate::profile::VirtualMachineProfile;
use crate::query::PlannerDependencies;
use crate::reservation::{
    HostReservationLedger, InMemoryReservationStore, ReservationStore, ResourceUsage,
    VmReservation,
};
use crate::types::{DataCenterId, Host, HostId, VmInstanceId, VmState};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Finds a destination for a VM and keeps the reservation bookkeeping that
/// goes with it
pub struct DeploymentPlanningManager {
    deps: PlannerDependencies,
    config: BerthConfig,
    planners: Vec<RegisteredPlanner>,
    host_allocators: Vec<Arc<dyn HostAllocator>>,
    pool_allocators: Vec<Arc<dyn StoragePoolAllocator>>,
    affinity_processors: Vec<Arc<dyn AffinityGroupProcessor>>,
    ledger: Arc<HostReservationLedger>,
}

impl std::fmt::Debug for DeploymentPlanningManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentPlanningManager")
            .field("planners", &self.planners)
            .field("host_allocators", &self.host_allocators.len())
            .field("pool_allocators", &self.pool_allocators.len())
            .field("affinity_processors", &self.affinity_processors.len())
            .field("ledger", &self.ledger)
            .finish()
    }
}

/// Builder for [`DeploymentPlanningManager`].
///
/// Components are consulted in registration order. With
/// [`with_default_components`](Self::with_default_components) the built-in
/// planners, allocators and processors are appended after any registered
/// explicitly, so an explicit planner shadows a built-in one of the same name.
pub struct DeploymentPlanningManagerBuilder {
    deps: PlannerDependencies,
    config: BerthConfig,
    store: Option<Arc<dyn ReservationStore>>,
    planners: Vec<RegisteredPlanner>,
    host_allocators: Vec<Arc<dyn HostAllocator>>,
    pool_allocators: Vec<Arc<dyn StoragePoolAllocator>>,
    affinity_processors: Vec<Arc<dyn AffinityGroupProcessor>>,
    default_components: bool,
}

impl DeploymentPlanningManagerBuilder {
    pub fn with_reservation_store(mut self, store: Arc<dyn ReservationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_planner(mut self, planner: RegisteredPlanner) -> Self {
        self.planners.push(planner);
        self
    }

    pub fn with_host_allocator(mut self, allocator: Arc<dyn HostAllocator>) -> Self {
        self.host_allocators.push(allocator);
        self
    }

    pub fn with_pool_allocator(mut self, allocator: Arc<dyn StoragePoolAllocator>) -> Self {
        self.pool_allocators.push(allocator);
        self
    }

    pub fn with_affinity_processor(mut self, processor: Arc<dyn AffinityGroupProcessor>) -> Self {
        self.affinity_processors.push(processor);
        self
    }

    pub fn with_default_components(mut self) -> Self {
        self.default_components = true;
        self
    }

    pub fn build(self) -> BerthResult<DeploymentPlanningManager> {
        self.config.validate()?;

        let store: Arc<dyn ReservationStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryReservationStore::new()),
        };
        let ledger = Arc::new(HostReservationLedger::new(
            store.clone(),
            self.deps.vms.clone(),
            self.deps.clock.clone(),
            &self.config.reservation,
        ));

        let mut planners = self.planners;
        let mut host_allocators = self.host_allocators;
        let mut pool_allocators = self.pool_allocators;
        let mut affinity_processors = self.affinity_processors;

        if self.default_components {
            let planner_config = &self.config.planner;
            planners.push(RegisteredPlanner::Cluster(Arc::new(FirstFitPlanner::new(
                self.deps.clone(),
                planner_config.clone(),
            ))));
            planners.push(RegisteredPlanner::Cluster(Arc::new(
                FirstFitPlanner::user_dispersing(self.deps.clone(), planner_config.clone()),
            )));
            planners.push(RegisteredPlanner::Cluster(Arc::new(
                FirstFitPlanner::user_concentrated_pod(self.deps.clone(), planner_config.clone()),
            )));
            planners.push(RegisteredPlanner::Cluster(Arc::new(
                ImplicitDedicationPlanner::new(self.deps.clone(), planner_config.clone()),
            )));
            planners.push(RegisteredPlanner::Direct(Arc::new(BareMetalPlanner::new(
                self.deps.clone(),
            ))));

            host_allocators.push(Arc::new(FirstFitAllocator::new(
                self.deps.clone(),
                planner_config.clone(),
            )));
            pool_allocators.extend(default_pool_allocators(&self.deps));
            affinity_processors.extend(default_affinity_processors(
                &self.deps,
                store,
                &self.config.reservation,
            ));
        }

        info!(
            "Deployment planning manager ready with planners {:?}",
            planners.iter().map(RegisteredPlanner::name).collect::<Vec<_>>()
        );

        Ok(DeploymentPlanningManager {
            deps: self.deps,
            config: self.config,
            planners,
            host_allocators,
            pool_allocators,
            affinity_processors,
            ledger,
        })
    }
}

impl DeploymentPlanningManager {
    pub fn builder(deps: PlannerDependencies, config: BerthConfig) -> DeploymentPlanningManagerBuilder {
        DeploymentPlanningManagerBuilder {
            deps,
            config,
            store: None,
            planners: Vec::new(),
            host_allocators: Vec::new(),
            pool_allocators: Vec::new(),
            affinity_processors: Vec::new(),
            default_components: false,
        }
    }

    /// Manager with every built-in component and an in-memory reservation store
    pub fn new(deps: PlannerDependencies, config: BerthConfig) -> BerthResult<Self> {
        Self::builder(deps, config).with_default_components().build()
    }

    pub fn ledger(&self) -> &Arc<HostReservationLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &BerthConfig {
        &self.config
    }

    /// Registered planner by name
    pub fn planner(&self, name: &str) -> Option<&RegisteredPlanner> {
        self.planners.iter().find(|p| p.name() == name)
    }

    /// Give a newly connected host its ledger row
    pub fn register_host(&self, host: &Host) -> BerthResult<()> {
        self.ledger.register_host(host)
    }

    /// Register every host the inventory knows in the zone
    pub fn register_zone_hosts(&self, dc: DataCenterId) -> BerthResult<usize> {
        let hosts = self.deps.inventory.list_hosts(dc);
        for host in &hosts {
            self.ledger.register_host(host)?;
        }
        Ok(hosts.len())
    }

    pub fn on_host_removed(&self, host_id: HostId) -> BerthResult<()> {
        self.ledger.on_host_removed(host_id)
    }

    /// Find a destination for the VM.
    ///
    /// `Ok(None)` means nothing fits; `avoid` then holds everything that was
    /// ruled out. Errors are reserved for requests that can never succeed as
    /// stated, such as a zone dedicated to another tenant.
    #[tracing::instrument(skip_all, fields(vm_id = profile.id(), dc = plan.data_center_id))]
    pub fn plan_deployment(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
        explicit_planner: Option<&RegisteredPlanner>,
    ) -> BerthResult<Option<DeployDestination>> {
        if let Some(destination) = self.reuse_vm_reservation(profile, avoid)? {
            return Ok(Some(destination));
        }

        let mut plan = plan.clone();
        self.check_dedicated_resources(profile, &plan, avoid)?;
        self.avoid_disabled_resources(profile, &plan, avoid)?;

        let needs_encryption = profile.volumes_require_encryption();
        let planner = self.resolve_planner(profile, explicit_planner);
        let usage = planner
            .as_ref()
            .map(|p| p.resource_usage(profile, &plan, avoid))
            .unwrap_or(ResourceUsage::Shared);

        if plan.host_id.is_some() && !profile.is_ha_placement() {
            return self.plan_on_fixed_host(profile, &plan, avoid, needs_encryption, usage);
        }

        if !profile.affinity_groups.is_empty() {
            for processor in &self.affinity_processors {
                debug!("Running affinity processor {}", processor.name());
                processor.process(profile, &mut plan, avoid)?;
            }
        }

        if let Some(destination) =
            self.plan_on_last_host(profile, &plan, avoid, needs_encryption, usage)?
        {
            return Ok(Some(destination));
        }

        let Some(planner) = planner else {
            return Ok(None);
        };
        if !planner.can_handle(profile, &plan, avoid) {
            debug!("Planner {} cannot handle VM {}", planner.name(), profile.id());
            return Ok(None);
        }

        match planner {
            RegisteredPlanner::Cluster(cluster_planner) => {
                let before = avoid.clone();
                let Some(clusters) = cluster_planner.order_clusters(profile, &plan, avoid) else {
                    debug!("Planner {} found no candidate clusters", cluster_planner.name());
                    return Ok(None);
                };
                let planner_additions = avoid.difference(&before);

                let destination = self.check_clusters_for_destination(
                    profile,
                    &plan,
                    avoid,
                    &clusters,
                    needs_encryption,
                    usage,
                )?;
                if destination.is_none() {
                    // Only the scan's own exclusions outlive the call
                    avoid.reset(&planner_additions);
                }
                Ok(destination)
            }
            RegisteredPlanner::Direct(direct_planner) => loop {
                let Some(destination) = direct_planner.plan(profile, &plan, avoid)? else {
                    return Ok(None);
                };
                let host_id = destination.host_id();
                if self.ledger.check_if_host_fits_planner_usage(host_id, usage)? {
                    return Ok(Some(destination));
                }
                debug!("Host {} is held for another usage, asking again", host_id);
                avoid.add_host(host_id);
            },
        }
    }

    /// Confirm the destination with the affinity processors and record it as
    /// the VM's reservation. `Ok(None)` when a processor rejects it.
    pub fn finalize_reservation(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        destination: &DeployDestination,
        planner_name: Option<&str>,
    ) -> BerthResult<Option<Uuid>> {
        for processor in &self.affinity_processors {
            if !profile.has_affinity_kind(processor.kind()) {
                continue;
            }
            if !processor.check(profile, destination)? {
                info!(
                    "Affinity processor {} rejected host {} for VM {}",
                    processor.name(),
                    destination.host_id(),
                    profile.id()
                );
                return Ok(None);
            }
        }

        let reservation = VmReservation {
            id: plan
                .reservation_context
                .as_ref()
                .map(|ctx| ctx.journal_id)
                .unwrap_or_else(Uuid::new_v4),
            vm_id: profile.id(),
            data_center_id: destination.data_center.id,
            pod_id: destination.pod.id,
            cluster_id: destination.cluster.id,
            host_id: destination.host_id(),
            planner: planner_name.map(str::to_string),
            volume_pools: destination.volume_pool_ids(),
            created_at: self.deps.clock.now(),
        };
        let id = reservation.id;
        self.ledger.store().save_vm_reservation(reservation)?;
        info!(
            "Reserved host {} for VM {} ({})",
            destination.host_id(),
            profile.id(),
            id
        );
        Ok(Some(id))
    }

    /// Plan and reserve, retrying elsewhere when the final affinity check
    /// rejects a destination
    pub fn plan_and_reserve(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
        explicit_planner: Option<&RegisteredPlanner>,
    ) -> BerthResult<Option<(DeployDestination, Uuid)>> {
        let planner_name = self
            .resolve_planner(profile, explicit_planner)
            .map(|p| p.name().to_string());
        loop {
            let Some(destination) = self.plan_deployment(profile, plan, avoid, explicit_planner)?
            else {
                return Ok(None);
            };
            if let Some(id) =
                self.finalize_reservation(profile, plan, &destination, planner_name.as_deref())?
            {
                return Ok(Some((destination, id)));
            }
            avoid.add_host(destination.host_id());
        }
    }

    /// Drop the VM's reservation once it leaves `Starting`
    pub fn on_vm_state_transition(
        &self,
        vm_id: VmInstanceId,
        old: VmState,
        new: VmState,
    ) -> BerthResult<()> {
        if old == VmState::Starting && new != VmState::Starting {
            if self.ledger.store().remove_vm_reservation(vm_id)? {
                debug!("Removed reservation of VM {} after {:?} -> {:?}", vm_id, old, new);
            }
        }
        Ok(())
    }

    /// Planner for the request: the caller's, the offering's, the bare-metal
    /// planner for bare-metal VMs, then the configured default
    fn resolve_planner(
        &self,
        profile: &VirtualMachineProfile,
        explicit_planner: Option<&RegisteredPlanner>,
    ) -> Option<RegisteredPlanner> {
        if let Some(planner) = explicit_planner {
            return Some(planner.clone());
        }

        let planner_config = &self.config.planner;
        let name = match profile.service_offering.deployment_planner.as_deref() {
            Some(name) => name,
            None if profile.is_bare_metal() => planner_config.bare_metal_planner.as_str(),
            None => planner_config.default_planner_name(),
        };
        let planner = self.planner(name).cloned();
        if planner.is_none() {
            warn!("Planner {} is not registered, VM {} cannot be planned", name, profile.id());
        }
        planner
    }
}
