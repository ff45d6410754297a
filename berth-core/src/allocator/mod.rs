//! Host and storage pool allocators
//!
//! Allocators are asked, in registration order, for ranked candidates inside
//! the scope of a plan. An empty list means "ask the next allocator"; when
//! every allocator returns nothing the cluster has no candidates. Allocators
//! never hand out an entity present in the exclude list, and they add the
//! entities they reject to it.

mod host;
mod storage;

pub use host::FirstFitAllocator;
pub use storage::{default_pool_allocators, CapacityOrderPoolAllocator, PoolAllocatorScope};

use crate::exclude_list::ExcludeList;
use crate::plan::DeploymentPlan;
use crate::profile::{DiskProfile, VirtualMachineProfile};
use crate::query::VmInstanceQuery;
use crate::types::{Host, StoragePool, VmState};

/// Ask for every candidate instead of a bounded number
pub const RETURN_UPTO_ALL: usize = usize::MAX;

/// Kind of host an allocation is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostType {
    /// Hypervisor hosts that run guest VMs
    Routing,
    /// Secondary storage hosts, never candidates for VM placement
    Storage,
}

pub trait HostAllocator: Send + Sync {
    fn name(&self) -> &str;

    fn allocate_to(
        &self,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        host_type: HostType,
        avoid: &mut ExcludeList,
        return_up_to: usize,
    ) -> Vec<Host>;
}

pub trait StoragePoolAllocator: Send + Sync {
    fn name(&self) -> &str;

    fn allocate_to_pool(
        &self,
        disk: &DiskProfile,
        profile: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        avoid: &mut ExcludeList,
        return_up_to: usize,
    ) -> Vec<StoragePool>;
}

/// Whether the host already runs as many guests as it is allowed to
pub(crate) fn host_reached_max_guest_limit(vms: &dyn VmInstanceQuery, host: &Host) -> bool {
    let Some(max_guests) = host.max_guests else {
        return false;
    };
    vms.list_by_host_in_states(host.id, &VmState::ACTIVE).len() >= max_guests as usize
}
