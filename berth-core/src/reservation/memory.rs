//! In-memory reservation store

use super::{PlannerHostReservation, ReservationStore, VmReservation};
use crate::error::BerthResult;
use crate::types::{HostId, VmInstanceId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Reservation store holding each host row behind its own mutex
#[derive(Debug, Default)]
pub struct InMemoryReservationStore {
    hosts: DashMap<HostId, Arc<Mutex<PlannerHostReservation>>>,
    vms: DashMap<VmInstanceId, VmReservation>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, host: HostId) -> Option<Arc<Mutex<PlannerHostReservation>>> {
        // Clone the Arc out so the shard lock is released before the row lock
        self.hosts.get(&host).map(|entry| entry.value().clone())
    }
}

impl ReservationStore for InMemoryReservationStore {
    fn find_host_reservation(&self, host: HostId) -> BerthResult<Option<PlannerHostReservation>> {
        Ok(self.row(host).map(|row| row.lock().clone()))
    }

    fn create_host_reservation(&self, reservation: PlannerHostReservation) -> BerthResult<bool> {
        let mut created = false;
        self.hosts.entry(reservation.host_id).or_insert_with(|| {
            created = true;
            Arc::new(Mutex::new(reservation))
        });
        Ok(created)
    }

    fn remove_host_reservation(&self, host: HostId) -> BerthResult<bool> {
        Ok(self.hosts.remove(&host).is_some())
    }

    fn list_host_reservations(&self) -> BerthResult<Vec<PlannerHostReservation>> {
        let rows: Vec<_> = self.hosts.iter().map(|entry| entry.value().clone()).collect();
        let mut reservations: Vec<_> = rows.iter().map(|row| row.lock().clone()).collect();
        reservations.sort_by_key(|r| r.host_id);
        Ok(reservations)
    }

    fn update_host_reservation_locked(
        &self,
        host: HostId,
        update: &mut dyn FnMut(&mut PlannerHostReservation) -> bool,
    ) -> BerthResult<Option<bool>> {
        let Some(row) = self.row(host) else {
            return Ok(None);
        };
        let mut guard = row.lock();
        Ok(Some(update(&mut guard)))
    }

    fn save_vm_reservation(&self, reservation: VmReservation) -> BerthResult<()> {
        self.vms.insert(reservation.vm_id, reservation);
        Ok(())
    }

    fn find_vm_reservation(&self, vm: VmInstanceId) -> BerthResult<Option<VmReservation>> {
        Ok(self.vms.get(&vm).map(|entry| entry.value().clone()))
    }

    fn list_vm_reservations(&self) -> BerthResult<Vec<VmReservation>> {
        let mut reservations: Vec<_> = self.vms.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.vm_id);
        Ok(reservations)
    }

    fn remove_vm_reservation(&self, vm: VmInstanceId) -> BerthResult<bool> {
        Ok(self.vms.remove(&vm).is_some())
    }
}
