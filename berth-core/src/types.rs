//! Inventory entities the planner reasons about
//!
//! Zones contain pods, pods contain clusters, clusters contain hosts. Storage
//! pools hang off a zone, a cluster or a single host depending on their scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type DataCenterId = u64;
pub type PodId = u64;
pub type ClusterId = u64;
pub type HostId = u64;
pub type PoolId = u64;
pub type VolumeId = u64;
pub type VmInstanceId = u64;
pub type AccountId = u64;
pub type DomainId = u64;
pub type AffinityGroupId = u64;
pub type GuestOsCategoryId = u64;

/// Administrative allocation state shared by zones, pods and clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AllocationState {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorType {
    #[default]
    Kvm,
    XenServer,
    VMware,
    Hyperv,
    BareMetal,
    Simulator,
}

impl fmt::Display for HypervisorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HypervisorType::Kvm => "KVM",
            HypervisorType::XenServer => "XenServer",
            HypervisorType::VMware => "VMware",
            HypervisorType::Hyperv => "Hyperv",
            HypervisorType::BareMetal => "BareMetal",
            HypervisorType::Simulator => "Simulator",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCenter {
    pub id: DataCenterId,
    pub name: String,
    #[serde(default)]
    pub allocation_state: AllocationState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: PodId,
    pub name: String,
    pub data_center_id: DataCenterId,
    #[serde(default)]
    pub allocation_state: AllocationState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub data_center_id: DataCenterId,
    pub pod_id: PodId,
    #[serde(default)]
    pub hypervisor: HypervisorType,
    #[serde(default)]
    pub allocation_state: AllocationState,
    #[serde(default = "default_overcommit_ratio")]
    pub cpu_overcommit_ratio: f64,
    #[serde(default = "default_overcommit_ratio")]
    pub memory_overcommit_ratio: f64,
    /// Cluster-level override of the global CPU disable threshold
    #[serde(default)]
    pub cpu_disable_threshold: Option<f64>,
    /// Cluster-level override of the global memory disable threshold
    #[serde(default)]
    pub memory_disable_threshold: Option<f64>,
}

fn default_overcommit_ratio() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[default]
    Up,
    Down,
    Disconnected,
    Alert,
    Connecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostResourceState {
    #[default]
    Enabled,
    Disabled,
    PrepareForMaintenance,
    Maintenance,
    ErrorInMaintenance,
}

/// Remaining vGPU slots of one type on a host GPU group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VgpuCapacity {
    pub vgpu_type: String,
    pub remaining: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuGroup {
    pub name: String,
    #[serde(default)]
    pub vgpu_types: Vec<VgpuCapacity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub uuid: String,
    pub name: String,
    pub data_center_id: DataCenterId,
    pub pod_id: PodId,
    pub cluster_id: ClusterId,
    #[serde(default)]
    pub hypervisor: HypervisorType,
    #[serde(default)]
    pub status: HostStatus,
    #[serde(default)]
    pub resource_state: HostResourceState,
    pub cpus: u32,
    pub cpu_speed_mhz: u32,
    pub total_memory_mb: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Hosts reserved for HA restarts are only handed out for HA placements
    #[serde(default)]
    pub ha_host: bool,
    #[serde(default)]
    pub max_guests: Option<u32>,
    #[serde(default)]
    pub volume_encryption: bool,
    #[serde(default)]
    pub uefi_enabled: bool,
    #[serde(default)]
    pub guest_os_category: Option<GuestOsCategoryId>,
    #[serde(default)]
    pub gpu_groups: Vec<GpuGroup>,
}

impl Host {
    pub fn is_up(&self) -> bool {
        self.status == HostStatus::Up
    }

    pub fn is_enabled(&self) -> bool {
        self.resource_state == HostResourceState::Enabled
    }

    /// Whether every tag in `required` is carried by this host
    pub fn has_tags(&self, required: &[String]) -> bool {
        required.iter().all(|t| self.tags.iter().any(|h| h == t))
    }

    pub fn has_gpu(&self) -> bool {
        !self.gpu_groups.is_empty()
    }

    /// Whether the host still has a free slot of the vGPU type in the group
    pub fn has_vgpu_capacity(&self, group: &str, vgpu_type: &str) -> bool {
        self.gpu_groups
            .iter()
            .filter(|g| g.name == group)
            .flat_map(|g| g.vgpu_types.iter())
            .any(|v| v.vgpu_type == vgpu_type && v.remaining > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolScope {
    Zone,
    Cluster,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    #[default]
    Up,
    Disabled,
    PrepareForMaintenance,
    Maintenance,
    ErrorInMaintenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePool {
    pub id: PoolId,
    pub uuid: String,
    pub name: String,
    pub data_center_id: DataCenterId,
    #[serde(default)]
    pub pod_id: Option<PodId>,
    #[serde(default)]
    pub cluster_id: Option<ClusterId>,
    /// Owning host of a host-scoped (local) pool
    #[serde(default)]
    pub host_id: Option<HostId>,
    pub scope: PoolScope,
    #[serde(default)]
    pub status: PoolStatus,
    /// Hypervisor a zone-wide pool serves, if restricted
    #[serde(default)]
    pub hypervisor: Option<HypervisorType>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub capacity_bytes: u64,
    #[serde(default)]
    pub used_bytes: u64,
    #[serde(default)]
    pub capacity_iops: Option<u64>,
    #[serde(default)]
    pub used_iops: u64,
    #[serde(default)]
    pub supports_encryption: bool,
    #[serde(default)]
    pub thin_provisioned: bool,
}

impl StoragePool {
    pub fn is_local(&self) -> bool {
        self.scope == PoolScope::Host
    }

    pub fn is_shared(&self) -> bool {
        !self.is_local()
    }

    pub fn is_in_maintenance(&self) -> bool {
        matches!(
            self.status,
            PoolStatus::PrepareForMaintenance | PoolStatus::Maintenance | PoolStatus::ErrorInMaintenance
        )
    }

    pub fn has_tags(&self, required: &[String]) -> bool {
        required.iter().all(|t| self.tags.iter().any(|p| p == t))
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VmType {
    #[default]
    User,
    DomainRouter,
    ConsoleProxy,
    SecondaryStorageVm,
    InternalLoadBalancerVm,
}

impl VmType {
    pub fn is_used_by_system(&self) -> bool {
        !matches!(self, VmType::User)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Migrating,
    Error,
    Expunging,
    Destroyed,
}

impl VmState {
    /// States in which a VM holds capacity on its host
    pub const ACTIVE: [VmState; 4] = [
        VmState::Starting,
        VmState::Running,
        VmState::Stopping,
        VmState::Migrating,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

/// How a VM was placed by the implicit dedication planner, if at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImplicitDedicationMode {
    Strict,
    Preferred,
}

/// A VM as the inventory records it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInstance {
    pub id: VmInstanceId,
    pub name: String,
    #[serde(default)]
    pub vm_type: VmType,
    pub account_id: AccountId,
    pub data_center_id: DataCenterId,
    #[serde(default)]
    pub hypervisor: HypervisorType,
    #[serde(default)]
    pub state: VmState,
    #[serde(default)]
    pub host_id: Option<HostId>,
    #[serde(default)]
    pub last_host_id: Option<HostId>,
    /// Destination of an in-flight migration
    #[serde(default)]
    pub migrating_to: Option<HostId>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub implicit_dedication: Option<ImplicitDedicationMode>,
}

/// Position of an entity in the zone/pod/cluster/host hierarchy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub data_center: Option<DataCenterId>,
    pub pod: Option<PodId>,
    pub cluster: Option<ClusterId>,
    pub host: Option<HostId>,
    pub pool: Option<PoolId>,
}

/// Entities an exclude list can be asked about
pub trait Locatable {
    fn location(&self) -> Location;
}

impl Locatable for DataCenter {
    fn location(&self) -> Location {
        Location {
            data_center: Some(self.id),
            ..Default::default()
        }
    }
}

impl Locatable for Pod {
    fn location(&self) -> Location {
        Location {
            data_center: Some(self.data_center_id),
            pod: Some(self.id),
            ..Default::default()
        }
    }
}

impl Locatable for Cluster {
    fn location(&self) -> Location {
        Location {
            data_center: Some(self.data_center_id),
            pod: Some(self.pod_id),
            cluster: Some(self.id),
            ..Default::default()
        }
    }
}

impl Locatable for Host {
    fn location(&self) -> Location {
        Location {
            data_center: Some(self.data_center_id),
            pod: Some(self.pod_id),
            cluster: Some(self.cluster_id),
            host: Some(self.id),
            pool: None,
        }
    }
}

impl Locatable for StoragePool {
    fn location(&self) -> Location {
        Location {
            data_center: Some(self.data_center_id),
            pod: self.pod_id,
            cluster: self.cluster_id,
            host: None,
            pool: Some(self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vgpu_capacity_lookup() {
        let host = Host {
            id: 1,
            uuid: "h1".into(),
            name: "h1".into(),
            data_center_id: 1,
            pod_id: 1,
            cluster_id: 1,
            hypervisor: HypervisorType::Kvm,
            status: HostStatus::Up,
            resource_state: HostResourceState::Enabled,
            cpus: 4,
            cpu_speed_mhz: 2000,
            total_memory_mb: 8192,
            tags: vec![],
            ha_host: false,
            max_guests: None,
            volume_encryption: false,
            uefi_enabled: false,
            guest_os_category: None,
            gpu_groups: vec![GpuGroup {
                name: "GRID K1".into(),
                vgpu_types: vec![
                    VgpuCapacity { vgpu_type: "K120Q".into(), remaining: 0 },
                    VgpuCapacity { vgpu_type: "K140Q".into(), remaining: 2 },
                ],
            }],
        };

        assert!(host.has_gpu());
        assert!(host.has_vgpu_capacity("GRID K1", "K140Q"));
        assert!(!host.has_vgpu_capacity("GRID K1", "K120Q"));
        assert!(!host.has_vgpu_capacity("GRID K2", "K140Q"));
    }

    #[test]
    fn test_pool_maintenance_states() {
        assert!(!VmState::Stopped.is_active());
        assert!(VmState::Migrating.is_active());
        let yaml = "id: 3\nuuid: p3\nname: p3\ndata_center_id: 1\nscope: zone\ncapacity_bytes: 10\nstatus: prepare_for_maintenance\n";
        let pool: StoragePool = serde_yaml::from_str(yaml).unwrap();
        assert!(pool.is_in_maintenance());
        assert!(pool.is_shared());
    }
}
