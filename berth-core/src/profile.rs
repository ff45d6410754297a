//! The VM being placed and everything the planner reads about it

use crate::types::{
    AccountId, AffinityGroupId, DomainId, GuestOsCategoryId, HypervisorType, ImplicitDedicationMode,
    PoolId, VmInstance, VmInstanceId, VmType, VolumeId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    #[default]
    User,
    DomainAdmin,
    RootAdmin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub domain_id: DomainId,
    /// Domain ids from the root domain down to `domain_id`
    #[serde(default)]
    pub domain_path: Vec<DomainId>,
    #[serde(default)]
    pub kind: AccountKind,
}

impl Account {
    pub fn is_root_admin(&self) -> bool {
        self.kind == AccountKind::RootAdmin
    }

    /// Whether the account's domain is `domain` or a child of it
    pub fn is_in_domain(&self, domain: DomainId) -> bool {
        self.domain_id == domain || self.domain_path.contains(&domain)
    }
}

/// vGPU device the offering asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VgpuRequirement {
    pub gpu_group: String,
    pub vgpu_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: u64,
    pub name: String,
    pub cpus: u32,
    pub cpu_speed_mhz: u32,
    pub memory_mb: u64,
    /// Host tag the host must carry
    #[serde(default)]
    pub host_tag: Option<String>,
    /// Planner named by the offering
    #[serde(default)]
    pub deployment_planner: Option<String>,
    #[serde(default)]
    pub vgpu: Option<VgpuRequirement>,
    /// Root volume placement of system VMs
    #[serde(default)]
    pub use_local_storage: bool,
    /// Mode used by the implicit dedication planner
    #[serde(default)]
    pub implicit_dedication_mode: Option<ImplicitDedicationMode>,
}

impl ServiceOffering {
    pub fn host_tags(&self) -> Vec<String> {
        crate::config::planner::parse_tag_list(self.host_tag.as_deref().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: u64,
    pub name: String,
    /// Disk layout is dictated by the template; all disks share one pool
    #[serde(default)]
    pub deploy_as_is: bool,
    #[serde(default)]
    pub guest_os_category: Option<GuestOsCategoryId>,
    #[serde(default)]
    pub template_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskOffering {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub use_local_storage: bool,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    Root,
    DataDisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    #[default]
    Allocated,
    Creating,
    Ready,
    Migrating,
    Destroy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub name: String,
    pub kind: VolumeKind,
    #[serde(default)]
    pub state: VolumeState,
    pub size_bytes: u64,
    #[serde(default)]
    pub pool_id: Option<PoolId>,
    pub disk_offering: DiskOffering,
    /// A passphrase means the volume is encrypted at rest
    #[serde(default)]
    pub has_passphrase: bool,
    #[serde(default)]
    pub min_iops: Option<u64>,
}

impl Volume {
    pub fn requires_encryption(&self) -> bool {
        self.has_passphrase
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityGroupKind {
    HostAntiAffinity,
    HostAffinity,
    ExplicitDedication,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffinityGroup {
    pub id: AffinityGroupId,
    pub name: String,
    pub kind: AffinityGroupKind,
    #[serde(default)]
    pub account_id: Option<AccountId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootType {
    Bios,
    Uefi,
}

/// Per-request flags that are not part of the VM record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentParams {
    /// Present for HA restarts; restricts placement to hosts with this tag
    pub ha_tag: Option<String>,
    /// Try the VM's last host before scanning clusters
    pub consider_last_host: bool,
    /// A first deployment rather than a restart of an existing VM
    pub deploy_vm: bool,
    pub boot_type: Option<BootType>,
}

impl Default for DeploymentParams {
    fn default() -> Self {
        Self {
            ha_tag: None,
            consider_last_host: true,
            deploy_vm: true,
            boot_type: None,
        }
    }
}

/// Everything the planner knows about the VM being placed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachineProfile {
    pub vm: VmInstance,
    pub owner: Account,
    pub service_offering: ServiceOffering,
    pub template: Template,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub affinity_groups: Vec<AffinityGroup>,
    #[serde(default)]
    pub params: DeploymentParams,
}

impl VirtualMachineProfile {
    pub fn id(&self) -> VmInstanceId {
        self.vm.id
    }

    pub fn vm_type(&self) -> VmType {
        self.vm.vm_type
    }

    pub fn hypervisor(&self) -> HypervisorType {
        self.vm.hypervisor
    }

    pub fn is_bare_metal(&self) -> bool {
        self.vm.hypervisor == HypervisorType::BareMetal
    }

    pub fn is_ha_placement(&self) -> bool {
        self.params.ha_tag.is_some()
    }

    /// Whether any volume needs a host that supports volume encryption
    pub fn volumes_require_encryption(&self) -> bool {
        self.volumes.iter().any(Volume::requires_encryption)
    }

    pub fn requires_uefi(&self) -> bool {
        self.params.boot_type == Some(BootType::Uefi)
    }

    pub fn is_legacy_bios(&self) -> bool {
        self.params.boot_type == Some(BootType::Bios)
    }

    pub fn volume(&self, id: VolumeId) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.id == id)
    }

    pub fn has_affinity_kind(&self, kind: AffinityGroupKind) -> bool {
        self.affinity_groups.iter().any(|g| g.kind == kind)
    }

    /// Whether a volume lands on host-local storage.
    ///
    /// System VMs take the root volume's placement from the service offering.
    pub fn volume_uses_local_storage(&self, volume: &Volume) -> bool {
        if self.vm.vm_type.is_used_by_system() && volume.kind == VolumeKind::Root {
            self.service_offering.use_local_storage
        } else {
            volume.disk_offering.use_local_storage
        }
    }

    /// `(needs shared, needs local)` across all volumes
    pub fn storage_requirements(&self) -> (bool, bool) {
        let mut shared = false;
        let mut local = false;
        for volume in &self.volumes {
            if self.volume_uses_local_storage(volume) {
                local = true;
            } else {
                shared = true;
            }
        }
        (shared, local)
    }

    pub fn disk_profile(&self, volume: &Volume) -> DiskProfile {
        DiskProfile {
            volume_id: volume.id,
            kind: volume.kind,
            size_bytes: volume.size_bytes,
            current_pool: volume.pool_id,
            use_local_storage: self.volume_uses_local_storage(volume),
            requires_encryption: volume.requires_encryption(),
            tags: volume.disk_offering.tags.clone(),
            hypervisor: self.hypervisor(),
            min_iops: volume.min_iops,
        }
    }
}

/// What a storage pool allocator needs to know about one volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskProfile {
    pub volume_id: VolumeId,
    pub kind: VolumeKind,
    pub size_bytes: u64,
    /// Pool already holding the volume, which needs no new space there
    pub current_pool: Option<PoolId>,
    pub use_local_storage: bool,
    pub requires_encryption: bool,
    pub tags: Vec<String>,
    pub hypervisor: HypervisorType,
    pub min_iops: Option<u64>,
}
