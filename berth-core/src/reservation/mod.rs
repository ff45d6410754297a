//! Host and VM reservation bookkeeping
//!
//! Every host carries a [`PlannerHostReservation`] row from the moment it
//! connects. The row's `resource_usage` records whether the host currently
//! serves shared or dedicated placements; it is set by the first planner that
//! lands a VM there and cleared once the host goes idle.
//!
//! [`VmReservation`] rows tie a starting VM to its planned destination so a
//! repeated planning call for the same VM reuses the earlier decision.

mod ledger;
mod memory;
mod redb_store;
mod sweeper;

pub use ledger::HostReservationLedger;
pub use memory::InMemoryReservationStore;
pub use redb_store::RedbReservationStore;
pub use sweeper::{CapacityReleaseNotifier, ReservationReleaseSweeper};

use crate::error::BerthResult;
use crate::types::{ClusterId, DataCenterId, Host, HostId, PodId, PoolId, VmInstanceId, VolumeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Tenancy mode a host is held in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceUsage {
    Shared,
    Dedicated,
}

impl fmt::Display for ResourceUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceUsage::Shared => f.write_str("Shared"),
            ResourceUsage::Dedicated => f.write_str("Dedicated"),
        }
    }
}

/// Per-host ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerHostReservation {
    pub host_id: HostId,
    pub data_center_id: DataCenterId,
    pub pod_id: PodId,
    pub cluster_id: ClusterId,
    /// `None` while no planner holds the host
    pub resource_usage: Option<ResourceUsage>,
}

impl PlannerHostReservation {
    pub fn for_host(host: &Host) -> Self {
        Self {
            host_id: host.id,
            data_center_id: host.data_center_id,
            pod_id: host.pod_id,
            cluster_id: host.cluster_id,
            resource_usage: None,
        }
    }
}

/// Planned destination of a VM that is still starting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmReservation {
    pub id: Uuid,
    pub vm_id: VmInstanceId,
    pub data_center_id: DataCenterId,
    pub pod_id: PodId,
    pub cluster_id: ClusterId,
    pub host_id: HostId,
    pub planner: Option<String>,
    /// Pool chosen for each volume that still needs preparing
    pub volume_pools: BTreeMap<VolumeId, PoolId>,
    pub created_at: DateTime<Utc>,
}

/// Persistence for ledger rows and VM reservations.
///
/// `update_host_reservation_locked` is the only serialization point between
/// concurrent planners: the closure runs while the host's row is locked, and
/// the row as the closure leaves it is written back.
pub trait ReservationStore: Send + Sync {
    fn find_host_reservation(&self, host: HostId) -> BerthResult<Option<PlannerHostReservation>>;

    /// Insert a row; returns false when the host already has one
    fn create_host_reservation(&self, reservation: PlannerHostReservation) -> BerthResult<bool>;

    fn remove_host_reservation(&self, host: HostId) -> BerthResult<bool>;

    fn list_host_reservations(&self) -> BerthResult<Vec<PlannerHostReservation>>;

    /// Run `update` on the locked row. `None` when the host has no row.
    fn update_host_reservation_locked(
        &self,
        host: HostId,
        update: &mut dyn FnMut(&mut PlannerHostReservation) -> bool,
    ) -> BerthResult<Option<bool>>;

    fn save_vm_reservation(&self, reservation: VmReservation) -> BerthResult<()>;

    fn find_vm_reservation(&self, vm: VmInstanceId) -> BerthResult<Option<VmReservation>>;

    fn list_vm_reservations(&self) -> BerthResult<Vec<VmReservation>>;

    fn remove_vm_reservation(&self, vm: VmInstanceId) -> BerthResult<bool>;
}
