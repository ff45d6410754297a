//! Host capacity records and overcommit-aware capacity checks
//!
//! CPU is tracked in MHz and memory in MB. Totals are physical; a cluster's
//! overcommit ratios scale them before free capacity is computed. Capacity is
//! "reserved" when it is held for a stopped VM that may return to the host.

use crate::error::BerthError;
use crate::profile::ServiceOffering;
use crate::types::{Cluster, Host, HostId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregate metric used to rank clusters and pods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CapacityType {
    #[default]
    Cpu,
    Memory,
}

impl fmt::Display for CapacityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityType::Cpu => f.write_str("cpu"),
            CapacityType::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for CapacityType {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(CapacityType::Cpu),
            "memory" | "ram" => Ok(CapacityType::Memory),
            other => Err(BerthError::invalid_config(
                "planner.host_capacity_type_to_order",
                other,
                "expected cpu or memory",
            )),
        }
    }
}

/// Cluster overcommit ratios
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OvercommitRatios {
    /// CPU overcommit ratio (e.g., 2.0 = allow 2x CPU allocation)
    pub cpu: f64,

    /// Memory overcommit ratio (e.g., 1.5 = allow 1.5x memory allocation)
    pub memory: f64,
}

impl Default for OvercommitRatios {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory: 1.0,
        }
    }
}

impl From<&Cluster> for OvercommitRatios {
    fn from(cluster: &Cluster) -> Self {
        Self {
            cpu: cluster.cpu_overcommit_ratio,
            memory: cluster.memory_overcommit_ratio,
        }
    }
}

/// Requested compute for one VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapacityRequest {
    pub cpu_mhz: u64,
    pub memory_mb: u64,
}

impl CapacityRequest {
    pub fn for_offering(offering: &ServiceOffering) -> Self {
        Self {
            cpu_mhz: offering.cpus as u64 * offering.cpu_speed_mhz as u64,
            memory_mb: offering.memory_mb,
        }
    }

    pub fn amount(&self, kind: CapacityType) -> u64 {
        match kind {
            CapacityType::Cpu => self.cpu_mhz,
            CapacityType::Memory => self.memory_mb,
        }
    }
}

/// One capacity dimension of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapacityRecord {
    pub total: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub reserved: u64,
}

impl CapacityRecord {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            used: 0,
            reserved: 0,
        }
    }

    /// Total capacity after applying an overcommit ratio
    pub fn effective_total(&self, ratio: f64) -> u64 {
        ((self.total as f64) * ratio) as u64
    }

    /// Capacity left after used and (optionally) reserved amounts
    pub fn free(&self, ratio: f64, consider_reserved: bool) -> u64 {
        let reserved = if consider_reserved { self.reserved } else { 0 };
        self.effective_total(ratio)
            .saturating_sub(self.used.saturating_add(reserved))
    }

    /// Fraction of effective capacity in use once `requested` is added
    pub fn utilization_with(&self, ratio: f64, requested: u64) -> f64 {
        let total = self.effective_total(ratio);
        if total == 0 {
            return 1.0;
        }
        (self.used + self.reserved + requested) as f64 / total as f64
    }
}

/// CPU and memory capacity of one host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapacity {
    pub host_id: HostId,
    pub cpu: CapacityRecord,
    pub memory: CapacityRecord,
}

impl HostCapacity {
    /// Capacity of an idle host, derived from its hardware description
    pub fn idle(host: &Host) -> Self {
        Self {
            host_id: host.id,
            cpu: CapacityRecord::new(host.cpus as u64 * host.cpu_speed_mhz as u64),
            memory: CapacityRecord::new(host.total_memory_mb),
        }
    }

    pub fn record(&self, kind: CapacityType) -> &CapacityRecord {
        match kind {
            CapacityType::Cpu => &self.cpu,
            CapacityType::Memory => &self.memory,
        }
    }

    /// Whether the host can take the request.
    ///
    /// With `from_reserved` the request is first matched against capacity
    /// held for a stopped VM; when that is not enough, free capacity is
    /// checked. `consider_reserved` decides whether reserved capacity counts
    /// as taken when computing free capacity. CPU and memory must both fit.
    pub fn has_capacity(
        &self,
        request: CapacityRequest,
        from_reserved: bool,
        ratios: OvercommitRatios,
        consider_reserved: bool,
    ) -> bool {
        if from_reserved
            && self.cpu.reserved >= request.cpu_mhz
            && self.memory.reserved >= request.memory_mb
        {
            return true;
        }

        self.cpu.free(ratios.cpu, consider_reserved) >= request.cpu_mhz
            && self.memory.free(ratios.memory, consider_reserved) >= request.memory_mb
    }
}

/// Whether a single host core is fast enough and the host has enough cores
pub fn host_has_cpu_capability(host: &Host, offering: &ServiceOffering) -> bool {
    host.cpus >= offering.cpus && host.cpu_speed_mhz >= offering.cpu_speed_mhz
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity(cpu_used: u64, mem_used: u64) -> HostCapacity {
        HostCapacity {
            host_id: 1,
            cpu: CapacityRecord {
                total: 4000,
                used: cpu_used,
                reserved: 0,
            },
            memory: CapacityRecord {
                total: 4096,
                used: mem_used,
                reserved: 0,
            },
        }
    }

    #[test]
    fn test_overcommit_extends_capacity() {
        let cap = capacity(4000, 0);
        let request = CapacityRequest {
            cpu_mhz: 2000,
            memory_mb: 1024,
        };

        assert!(!cap.has_capacity(request, false, OvercommitRatios::default(), true));
        assert!(cap.has_capacity(
            request,
            false,
            OvercommitRatios {
                cpu: 2.0,
                memory: 1.0
            },
            true
        ));
    }

    #[test]
    fn test_both_dimensions_required() {
        let cap = capacity(0, 4000);
        let request = CapacityRequest {
            cpu_mhz: 1000,
            memory_mb: 512,
        };
        assert!(!cap.has_capacity(request, false, OvercommitRatios::default(), true));
    }

    #[test]
    fn test_reserved_capacity_serves_returning_vm() {
        let mut cap = capacity(2000, 2048);
        cap.cpu.reserved = 2000;
        cap.memory.reserved = 2048;
        let request = CapacityRequest {
            cpu_mhz: 2000,
            memory_mb: 2048,
        };

        assert!(cap.has_capacity(request, true, OvercommitRatios::default(), true));
        assert!(!cap.has_capacity(request, false, OvercommitRatios::default(), true));
        assert!(cap.has_capacity(request, false, OvercommitRatios::default(), false));
    }

    #[test]
    fn test_utilization_with_request() {
        let cap = capacity(3000, 0);
        let util = cap.cpu.utilization_with(1.0, 500);
        assert!((util - 0.875).abs() < f64::EPSILON);
        assert_eq!(CapacityRecord::new(0).utilization_with(1.0, 0), 1.0);
    }

    #[test]
    fn test_capacity_type_parsing() {
        assert_eq!("RAM".parse::<CapacityType>().unwrap(), CapacityType::Memory);
        assert!("disk".parse::<CapacityType>().is_err());
    }
}
