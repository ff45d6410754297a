//! Host reservation ledger

use super::{PlannerHostReservation, ReservationStore, ResourceUsage};
use crate::clock::Clock;
use crate::config::ReservationConfig;
use crate::error::BerthResult;
use crate::query::VmInstanceQuery;
use crate::types::{Host, HostId, VmState};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keeps each host in one tenancy mode at a time.
///
/// A host with no ledger row is never handed out. A host whose row has no
/// usage is claimed by the first planner asking for it; later planners must
/// ask for the same usage until the host goes idle and the row is cleared.
pub struct HostReservationLedger {
    store: Arc<dyn ReservationStore>,
    vms: Arc<dyn VmInstanceQuery>,
    clock: Arc<dyn Clock>,
    grace_window: chrono::Duration,
}

impl std::fmt::Debug for HostReservationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostReservationLedger")
            .field("clock", &self.clock)
            .field("grace_window", &self.grace_window)
            .finish_non_exhaustive()
    }
}

impl HostReservationLedger {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        vms: Arc<dyn VmInstanceQuery>,
        clock: Arc<dyn Clock>,
        config: &ReservationConfig,
    ) -> Self {
        Self {
            store,
            vms,
            clock,
            grace_window: config.grace_window(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReservationStore> {
        &self.store
    }

    /// Create the host's row when it first connects
    pub fn register_host(&self, host: &Host) -> BerthResult<()> {
        if self.store.create_host_reservation(PlannerHostReservation::for_host(host))? {
            info!("Registered reservation row for host {}", host.id);
        } else {
            debug!("Host {} already has a reservation row", host.id);
        }
        Ok(())
    }

    pub fn on_host_removed(&self, host_id: HostId) -> BerthResult<()> {
        if self.store.remove_host_reservation(host_id)? {
            info!("Removed reservation row for host {}", host_id);
        }
        Ok(())
    }

    /// Whether the host can take a VM needing `required` usage, claiming the
    /// host for that usage when nobody holds it
    pub fn check_if_host_fits_planner_usage(
        &self,
        host_id: HostId,
        required: ResourceUsage,
    ) -> BerthResult<bool> {
        let Some(row) = self.store.find_host_reservation(host_id)? else {
            debug!("Host {} has no reservation row, cannot use it", host_id);
            return Ok(false);
        };

        if let Some(usage) = row.resource_usage {
            if usage != required {
                debug!(
                    "Host {} is reserved for {} usage, planner needs {}",
                    host_id, usage, required
                );
            }
            return Ok(usage == required);
        }

        // Someone may have claimed the host between the read and the lock
        let outcome = self
            .store
            .update_host_reservation_locked(host_id, &mut |row| match row.resource_usage {
                None => {
                    row.resource_usage = Some(required);
                    true
                }
                Some(existing) => existing == required,
            })?;

        match outcome {
            Some(true) => {
                info!("Host {} reserved for {} usage", host_id, required);
                Ok(true)
            }
            Some(false) => {
                debug!("Host {} was claimed for another usage concurrently", host_id);
                Ok(false)
            }
            None => {
                debug!("Host {} lost its reservation row", host_id);
                Ok(false)
            }
        }
    }

    /// Clear the host's usage if nothing runs, moves or recently ran there.
    /// Returns whether the usage was cleared.
    pub fn check_host_reservation_release(&self, host_id: HostId) -> BerthResult<bool> {
        let Some(row) = self.store.find_host_reservation(host_id)? else {
            return Ok(false);
        };
        if row.resource_usage.is_none() {
            return Ok(false);
        }
        if !self.host_is_idle(host_id) {
            return Ok(false);
        }

        let released = self
            .store
            .update_host_reservation_locked(host_id, &mut |row| row.resource_usage.take().is_some())?
            .unwrap_or(false);
        if released {
            info!("Released reservation of host {}", host_id);
        }
        Ok(released)
    }

    /// Run a release check on every host that holds a usage
    pub fn release_idle_hosts(&self) -> BerthResult<Vec<HostId>> {
        let mut released = Vec::new();
        for row in self.store.list_host_reservations()? {
            if row.resource_usage.is_none() {
                continue;
            }
            match self.check_host_reservation_release(row.host_id) {
                Ok(true) => released.push(row.host_id),
                Ok(false) => {}
                Err(e) => warn!("Failed to release reservation of host {}: {}", row.host_id, e),
            }
        }
        Ok(released)
    }

    fn host_is_idle(&self, host_id: HostId) -> bool {
        let active = self.vms.list_by_host_in_states(host_id, &VmState::ACTIVE);
        if !active.is_empty() {
            debug!("Host {} still has {} active VMs", host_id, active.len());
            return false;
        }

        if !self.vms.list_migrating_to(host_id).is_empty() {
            debug!("Host {} has VMs migrating to it", host_id);
            return false;
        }

        let now = self.clock.now();
        if let Some(vm) = self
            .vms
            .list_stopped_by_last_host(host_id)
            .into_iter()
            .find(|vm| now - vm.updated_at < self.grace_window)
        {
            debug!(
                "VM {} stopped on host {} inside the capacity release interval",
                vm.id, host_id
            );
            return false;
        }

        // A starting VM without a host may be headed anywhere
        if !self.vms.list_starting_without_host().is_empty() {
            debug!("VMs are starting without a host, keeping host {} reserved", host_id);
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::config::StorageConfig;
    use crate::inventory::{InMemoryInventory, InventorySnapshot};
    use crate::query::InventoryQuery;
    use crate::reservation::InMemoryReservationStore;
    use chrono::Utc;

    const INVENTORY: &str = r#"
clusters:
  - { id: 1, name: c1, data_center_id: 1, pod_id: 1 }
hosts:
  - { id: 1, uuid: h1, name: h1, data_center_id: 1, pod_id: 1, cluster_id: 1, cpus: 4, cpu_speed_mhz: 2000, total_memory_mb: 8192 }
vms:
  - { id: 100, name: vm100, account_id: 5, data_center_id: 1, state: running, host_id: 1 }
"#;

    fn ledger() -> (Arc<InMemoryInventory>, Arc<MockClock>, HostReservationLedger) {
        let inventory = Arc::new(InMemoryInventory::from_snapshot(
            InventorySnapshot::from_yaml_str(INVENTORY).unwrap(),
            StorageConfig::default(),
        ));
        let clock = Arc::new(MockClock::at(Utc::now()));
        let ledger = HostReservationLedger::new(
            Arc::new(InMemoryReservationStore::new()),
            inventory.clone(),
            clock.clone(),
            &ReservationConfig::default(),
        );
        (inventory, clock, ledger)
    }

    #[test]
    fn test_unregistered_host_fails_closed() {
        let (_, _, ledger) = ledger();
        assert!(!ledger.check_if_host_fits_planner_usage(1, ResourceUsage::Shared).unwrap());
    }

    #[test]
    fn test_first_claim_wins_mode() {
        let (inventory, _, ledger) = ledger();
        ledger.register_host(&inventory.find_host(1).unwrap()).unwrap();

        assert!(ledger.check_if_host_fits_planner_usage(1, ResourceUsage::Dedicated).unwrap());
        assert!(ledger.check_if_host_fits_planner_usage(1, ResourceUsage::Dedicated).unwrap());
        assert!(!ledger.check_if_host_fits_planner_usage(1, ResourceUsage::Shared).unwrap());
    }

    #[test]
    fn test_release_waits_for_grace_window() {
        let (inventory, clock, ledger) = ledger();
        ledger.register_host(&inventory.find_host(1).unwrap()).unwrap();
        ledger.check_if_host_fits_planner_usage(1, ResourceUsage::Shared).unwrap();

        assert!(!ledger.check_host_reservation_release(1).unwrap());

        inventory.set_vm_state(100, VmState::Stopped, None, clock.now()).unwrap();
        assert!(!ledger.check_host_reservation_release(1).unwrap());

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(ledger.release_idle_hosts().unwrap(), vec![1]);
        assert!(ledger.check_if_host_fits_planner_usage(1, ResourceUsage::Dedicated).unwrap());
    }
}
