//! redb-backed reservation store
//!
//! redb admits one write transaction at a time, so a write transaction is the
//! row lock for `update_host_reservation_locked`: the read, the closure and the
//! write-back all happen before any other writer can observe the row.

use super::{PlannerHostReservation, ReservationStore, VmReservation};
use crate::error::{BerthResult, SerializationContext, StorageContext};
use crate::types::{HostId, VmInstanceId};
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

pub const HOST_RESERVATION_TABLE: TableDefinition<u64, &[u8]> =
    TableDefinition::new("planner_host_reservations");
pub const VM_RESERVATION_TABLE: TableDefinition<u64, &[u8]> =
    TableDefinition::new("vm_reservations");

pub struct RedbReservationStore {
    database: Database,
}

impl std::fmt::Debug for RedbReservationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbReservationStore").finish_non_exhaustive()
    }
}

fn begin_write(database: &Database, operation: &str) -> BerthResult<WriteTransaction> {
    let txn = database
        .begin_write()
        .storage_context(&format!("begin write transaction for {}", operation))?;
    debug!("Started write transaction for: {}", operation);
    Ok(txn)
}

fn begin_read(database: &Database, operation: &str) -> BerthResult<ReadTransaction> {
    let txn = database
        .begin_read()
        .storage_context(&format!("begin read transaction for {}", operation))?;
    debug!("Started read transaction for: {}", operation);
    Ok(txn)
}

fn decode<T: DeserializeOwned>(bytes: &[u8], operation: &str) -> BerthResult<T> {
    bincode::deserialize(bytes).serialization_context(operation)
}

impl RedbReservationStore {
    /// Open or create the database file and make sure both tables exist
    pub fn open(path: impl AsRef<Path>) -> BerthResult<Self> {
        let database = Database::create(path.as_ref()).storage_context("open reservation database")?;
        let txn = begin_write(&database, "create reservation tables")?;
        {
            txn.open_table(HOST_RESERVATION_TABLE)
                .storage_context("open host reservation table")?;
            txn.open_table(VM_RESERVATION_TABLE)
                .storage_context("open VM reservation table")?;
        }
        txn.commit().storage_context("commit reservation tables")?;
        Ok(Self { database })
    }

    fn get<T: DeserializeOwned>(
        &self,
        table: TableDefinition<u64, &[u8]>,
        key: u64,
        operation: &str,
    ) -> BerthResult<Option<T>> {
        let txn = begin_read(&self.database, operation)?;
        let table = txn
            .open_table(table)
            .storage_context(&format!("open table for {}", operation))?;
        let bytes = table
            .get(key)
            .storage_context(operation)?
            .map(|guard| guard.value().to_vec());
        bytes.map(|b| decode(&b, operation)).transpose()
    }

    fn list<T: DeserializeOwned>(
        &self,
        table: TableDefinition<u64, &[u8]>,
        operation: &str,
    ) -> BerthResult<Vec<T>> {
        let txn = begin_read(&self.database, operation)?;
        let table = txn
            .open_table(table)
            .storage_context(&format!("open table for {}", operation))?;
        let mut values = Vec::new();
        for entry in table.iter().storage_context(operation)? {
            let (_, value) = entry.storage_context(operation)?;
            values.push(decode(value.value(), operation)?);
        }
        Ok(values)
    }

    fn remove(&self, table: TableDefinition<u64, &[u8]>, key: u64, operation: &str) -> BerthResult<bool> {
        let txn = begin_write(&self.database, operation)?;
        let removed = {
            let mut table = txn
                .open_table(table)
                .storage_context(&format!("open table for {}", operation))?;
            let removed = table.remove(key).storage_context(operation)?.is_some();
            removed
        };
        txn.commit()
            .storage_context(&format!("commit {}", operation))?;
        Ok(removed)
    }
}

impl ReservationStore for RedbReservationStore {
    fn find_host_reservation(&self, host: HostId) -> BerthResult<Option<PlannerHostReservation>> {
        self.get(HOST_RESERVATION_TABLE, host, "find host reservation")
    }

    fn create_host_reservation(&self, reservation: PlannerHostReservation) -> BerthResult<bool> {
        let operation = "create host reservation";
        let txn = begin_write(&self.database, operation)?;
        let created = {
            let mut table = txn
                .open_table(HOST_RESERVATION_TABLE)
                .storage_context(&format!("open table for {}", operation))?;
            let exists = table
                .get(reservation.host_id)
                .storage_context(operation)?
                .is_some();
            if !exists {
                let bytes = bincode::serialize(&reservation).serialization_context(operation)?;
                table
                    .insert(reservation.host_id, bytes.as_slice())
                    .storage_context(operation)?;
            }
            !exists
        };
        txn.commit()
            .storage_context(&format!("commit {}", operation))?;
        Ok(created)
    }

    fn remove_host_reservation(&self, host: HostId) -> BerthResult<bool> {
        self.remove(HOST_RESERVATION_TABLE, host, "remove host reservation")
    }

    fn list_host_reservations(&self) -> BerthResult<Vec<PlannerHostReservation>> {
        self.list(HOST_RESERVATION_TABLE, "list host reservations")
    }

    fn update_host_reservation_locked(
        &self,
        host: HostId,
        update: &mut dyn FnMut(&mut PlannerHostReservation) -> bool,
    ) -> BerthResult<Option<bool>> {
        let operation = "update host reservation";
        let txn = begin_write(&self.database, operation)?;
        let outcome = {
            let mut table = txn
                .open_table(HOST_RESERVATION_TABLE)
                .storage_context(&format!("open table for {}", operation))?;
            let current = table
                .get(host)
                .storage_context(operation)?
                .map(|guard| guard.value().to_vec());
            match current {
                None => None,
                Some(bytes) => {
                    let mut row: PlannerHostReservation = decode(&bytes, operation)?;
                    let result = update(&mut row);
                    let bytes = bincode::serialize(&row).serialization_context(operation)?;
                    table
                        .insert(host, bytes.as_slice())
                        .storage_context(operation)?;
                    Some(result)
                }
            }
        };
        txn.commit()
            .storage_context(&format!("commit {}", operation))?;
        Ok(outcome)
    }

    fn save_vm_reservation(&self, reservation: VmReservation) -> BerthResult<()> {
        let operation = "save VM reservation";
        let bytes = bincode::serialize(&reservation).serialization_context(operation)?;
        let txn = begin_write(&self.database, operation)?;
        {
            let mut table = txn
                .open_table(VM_RESERVATION_TABLE)
                .storage_context(&format!("open table for {}", operation))?;
            table
                .insert(reservation.vm_id, bytes.as_slice())
                .storage_context(operation)?;
        }
        txn.commit()
            .storage_context(&format!("commit {}", operation))?;
        Ok(())
    }

    fn find_vm_reservation(&self, vm: VmInstanceId) -> BerthResult<Option<VmReservation>> {
        self.get(VM_RESERVATION_TABLE, vm, "find VM reservation")
    }

    fn list_vm_reservations(&self) -> BerthResult<Vec<VmReservation>> {
        self.list(VM_RESERVATION_TABLE, "list VM reservations")
    }

    fn remove_vm_reservation(&self, vm: VmInstanceId) -> BerthResult<bool> {
        self.remove(VM_RESERVATION_TABLE, vm, "remove VM reservation")
    }
}
