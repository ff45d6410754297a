//! Placements that skip the cluster scan: a reservation being reused, a host
//! pinned by the caller, and the host the VM last ran on

use super::DeploymentPlanningManager;
use crate::allocator::host_reached_max_guest_limit;
use crate::capacity::{CapacityRequest, HostCapacity, OvercommitRatios};
use crate::error::BerthResult;
use crate::exclude_list::ExcludeList;
use crate::plan::{DeployDestination, DeploymentPlan};
use crate::planner::build_destination;
use crate::profile::VirtualMachineProfile;
use crate::reservation::ResourceUsage;
use crate::types::{Host, VmState};
use std::collections::BTreeMap;
use tracing::{debug, info};

impl DeploymentPlanningManager {
    /// Destination recorded for a VM that is still starting. A VM found
    /// stopped with no last host has its stale reservation dropped.
    pub(super) fn reuse_vm_reservation(
        &self,
        profile: &VirtualMachineProfile,
        avoid: &ExcludeList,
    ) -> BerthResult<Option<DeployDestination>> {
        let vm = &profile.vm;
        let store = self.ledger.store();

        if vm.state == VmState::Stopped && vm.last_host_id.is_none() {
            if store.remove_vm_reservation(vm.id)? {
                debug!("Discarded stale reservation of stopped VM {}", vm.id);
            }
            return Ok(None);
        }
        if vm.state != VmState::Starting {
            return Ok(None);
        }
        let Some(reservation) = store.find_vm_reservation(vm.id)? else {
            return Ok(None);
        };

        let inventory = &self.deps.inventory;
        let Some(host) = inventory
            .find_host(reservation.host_id)
            .filter(|h| !avoid.should_avoid(h))
        else {
            debug!(
                "Reserved host {} of VM {} is gone or avoided, planning again",
                reservation.host_id, vm.id
            );
            return Ok(None);
        };

        let mut storage = BTreeMap::new();
        for (volume, pool_id) in &reservation.volume_pools {
            let Some(pool) = inventory.find_pool(*pool_id) else {
                debug!("Reserved pool {} of VM {} is gone, planning again", pool_id, vm.id);
                return Ok(None);
            };
            storage.insert(*volume, pool);
        }

        let destination = build_destination(inventory.as_ref(), host, storage);
        if destination.is_some() {
            info!("Reusing reservation {} for starting VM {}", reservation.id, vm.id);
        }
        Ok(destination)
    }

    /// Place on the host the caller pinned. Never falls back to a search.
    pub(super) fn plan_on_fixed_host(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
        needs_encryption: bool,
        usage: ResourceUsage,
    ) -> BerthResult<Option<DeployDestination>> {
        let Some(host_id) = plan.host_id else {
            return Ok(None);
        };
        debug!("VM {} asks for host {}", profile.id(), host_id);

        let Some(host) = self.deps.inventory.find_host(host_id) else {
            debug!("Requested host {} does not exist", host_id);
            return Ok(None);
        };
        if avoid.should_avoid(&host) {
            debug!("Requested host {} is in avoid set", host_id);
            return Ok(None);
        }
        if !host.is_up() {
            debug!("Requested host {} is {:?}", host_id, host.status);
            return Ok(None);
        }
        if profile.requires_uefi() && !host.uefi_enabled {
            debug!("Requested host {} cannot boot UEFI guests", host_id);
            return Ok(None);
        }
        if needs_encryption && !host.volume_encryption {
            debug!("Requested host {} does not support volume encryption", host_id);
            avoid.add_host(host_id);
            return Ok(None);
        }

        let scoped = plan.scoped_to(host.pod_id, host.cluster_id, Some(host.id));
        self.place_on_single_host(profile, &scoped, avoid, host, needs_encryption, usage)
    }

    /// Place on the VM's previous host when it still qualifies
    pub(super) fn plan_on_last_host(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
        needs_encryption: bool,
        usage: ResourceUsage,
    ) -> BerthResult<Option<DeployDestination>> {
        if profile.is_ha_placement() || !profile.params.consider_last_host {
            return Ok(None);
        }
        let Some(last_host_id) = profile.vm.last_host_id else {
            return Ok(None);
        };
        let Some(host) = self.deps.inventory.find_host(last_host_id) else {
            debug!("Last host {} of VM {} no longer exists", last_host_id, profile.id());
            return Ok(None);
        };

        debug!("Trying last host {} of VM {}", host.id, profile.id());
        if !self.last_host_qualifies(profile, plan, avoid, &host, needs_encryption) {
            return Ok(None);
        }

        let scoped = plan.scoped_to(host.pod_id, host.cluster_id, Some(host.id));
        let destination =
            self.place_on_single_host(profile, &scoped, avoid, host, needs_encryption, usage)?;
        if let Some(destination) = &destination {
            info!("VM {} returns to its last host {}", profile.id(), destination.host_id());
        }
        Ok(destination)
    }

    fn last_host_qualifies(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &ExcludeList,
        host: &Host,
        needs_encryption: bool,
    ) -> bool {
        let offering = &profile.service_offering;
        let reject = |reason: &str| {
            debug!("Last host {} rejected: {}", host.id, reason);
            false
        };

        if avoid.should_avoid(host) {
            return reject("in avoid set");
        }
        if host.data_center_id != plan.data_center_id
            || plan.pod_id.is_some_and(|pod| pod != host.pod_id)
            || plan.cluster_id.is_some_and(|cluster| cluster != host.cluster_id)
        {
            return reject("outside the planned scope");
        }
        if host.hypervisor != profile.hypervisor() {
            return reject("hypervisor differs");
        }
        if host_reached_max_guest_limit(self.deps.vms.as_ref(), host) {
            return reject("max guest limit reached");
        }
        if let Some(vgpu) = &offering.vgpu {
            if !host.has_vgpu_capacity(&vgpu.gpu_group, &vgpu.vgpu_type) {
                return reject("requested vGPU not available");
            }
        }
        if needs_encryption && !host.volume_encryption {
            return reject("no volume encryption support");
        }
        if profile.requires_uefi() && !host.uefi_enabled {
            return reject("no UEFI support");
        }
        if !host.is_up() || !host.is_enabled() {
            return reject("not up and enabled");
        }

        let mut tags = offering.host_tags();
        tags.extend(profile.template.template_tag.iter().cloned());
        if !host.has_tags(&tags) {
            return reject("host tags do not match");
        }
        if let Some(category) = host.guest_os_category {
            if profile.template.guest_os_category != Some(category) {
                return reject("guest OS category differs");
            }
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
        if !capacity.has_capacity(CapacityRequest::for_offering(offering), true, ratios, true) {
            return reject("not enough reserved or free capacity");
        }
        true
    }

    fn place_on_single_host(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
        host: Host,
        needs_encryption: bool,
        usage: ResourceUsage,
    ) -> BerthResult<Option<DeployDestination>> {
        let selection = self.find_suitable_pools_for_volumes(profile, plan, avoid)?;
        if !selection.is_complete(profile) {
            debug!("No storage for VM {} next to host {}", profile.id(), host.id);
            return Ok(None);
        }
        self.find_host_and_pools(profile, plan, avoid, vec![host], &selection, needs_encryption, usage)
    }
}
