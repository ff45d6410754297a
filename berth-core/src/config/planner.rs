//! Deployment planner configuration

use super::defaults::*;
use super::{parse_bool_from_env, parse_f64_from_env};
use crate::capacity::CapacityType;
use crate::error::{BerthError, BerthResult};
use crate::types::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How hosts inside a cluster are ordered, and which planner is the default
/// when none is configured explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AllocationAlgorithm {
    #[default]
    Random,
    FirstFit,
    FirstFitLeastConsumed,
    UserDispersing,
    UserConcentratedPod,
}

impl AllocationAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationAlgorithm::Random => "random",
            AllocationAlgorithm::FirstFit => "firstfit",
            AllocationAlgorithm::FirstFitLeastConsumed => "firstfitleastconsumed",
            AllocationAlgorithm::UserDispersing => "userdispersing",
            AllocationAlgorithm::UserConcentratedPod => "userconcentratedpod",
        }
    }
}

impl fmt::Display for AllocationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationAlgorithm {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(AllocationAlgorithm::Random),
            "firstfit" => Ok(AllocationAlgorithm::FirstFit),
            "firstfitleastconsumed" => Ok(AllocationAlgorithm::FirstFitLeastConsumed),
            "userdispersing" => Ok(AllocationAlgorithm::UserDispersing),
            "userconcentratedpod" | "userconcentratedpod_random"
            | "userconcentratedpod_firstfit" => Ok(AllocationAlgorithm::UserConcentratedPod),
            other => Err(BerthError::invalid_config(
                "planner.allocation_algorithm",
                other,
                "expected random, firstfit, firstfitleastconsumed, userdispersing or userconcentratedpod",
            )),
        }
    }
}

/// Deployment planner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Host ordering inside a cluster
    pub allocation_algorithm: AllocationAlgorithm,

    /// Global default planner name
    pub default_planner: Option<String>,

    /// Planner used for bare-metal VMs
    pub bare_metal_planner: String,

    /// Scan pods first, then clusters inside each pod
    pub apply_allocation_at_pods: bool,

    /// Cluster CPU allocation fraction above which the cluster is skipped
    pub cluster_cpu_disable_threshold: f64,

    /// Cluster memory allocation fraction above which the cluster is skipped
    pub cluster_memory_disable_threshold: f64,

    /// When false, VM starts skip the cluster threshold filter
    pub cluster_threshold_enabled: bool,

    /// Aggregate capacity metric used to rank clusters and pods
    pub host_capacity_type_to_order: CapacityType,

    /// Host tags that mark specialised hosts
    pub implicit_host_tags: Vec<String>,

    /// Weight of the account VM count against the capacity rank
    pub user_dispersion_weight: f64,

    /// System VMs may be placed on disabled resources
    pub allow_router_on_disabled_resources: bool,

    /// VMs owned by a root admin may be placed on disabled resources
    pub allow_admin_vm_on_disabled_resources: bool,

    /// Pool UUID moved to the front of every candidate list
    pub preferred_storage_pool: Option<String>,

    /// Per-account override of `preferred_storage_pool`
    pub account_preferred_storage_pools: HashMap<AccountId, String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            allocation_algorithm: AllocationAlgorithm::default(),
            default_planner: None,
            bare_metal_planner: DEFAULT_BARE_METAL_PLANNER.to_string(),
            apply_allocation_at_pods: false,
            cluster_cpu_disable_threshold: DEFAULT_CLUSTER_CPU_DISABLE_THRESHOLD,
            cluster_memory_disable_threshold: DEFAULT_CLUSTER_MEMORY_DISABLE_THRESHOLD,
            cluster_threshold_enabled: true,
            host_capacity_type_to_order: CapacityType::Cpu,
            implicit_host_tags: parse_tag_list(DEFAULT_IMPLICIT_HOST_TAGS),
            user_dispersion_weight: DEFAULT_USER_DISPERSION_WEIGHT,
            allow_router_on_disabled_resources: false,
            allow_admin_vm_on_disabled_resources: false,
            preferred_storage_pool: None,
            account_preferred_storage_pools: HashMap::new(),
        }
    }
}

impl PlannerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BerthResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) -> BerthResult<()> {
        if let Ok(algorithm) = std::env::var("BERTH_ALLOCATION_ALGORITHM") {
            self.allocation_algorithm = algorithm.parse()?;
        }

        if let Ok(planner) = std::env::var("BERTH_DEFAULT_PLANNER") {
            self.default_planner = Some(planner).filter(|p| !p.trim().is_empty());
        }

        if let Ok(planner) = std::env::var("BERTH_BARE_METAL_PLANNER") {
            self.bare_metal_planner = planner;
        }

        if let Some(value) = parse_bool_from_env("BERTH_APPLY_ALLOCATION_AT_PODS")? {
            self.apply_allocation_at_pods = value;
        }

        if let Some(value) = parse_f64_from_env("BERTH_CLUSTER_CPU_DISABLE_THRESHOLD")? {
            self.cluster_cpu_disable_threshold = value;
        }

        if let Some(value) = parse_f64_from_env("BERTH_CLUSTER_MEMORY_DISABLE_THRESHOLD")? {
            self.cluster_memory_disable_threshold = value;
        }

        if let Some(value) = parse_bool_from_env("BERTH_CLUSTER_THRESHOLD_ENABLED")? {
            self.cluster_threshold_enabled = value;
        }

        if let Ok(kind) = std::env::var("BERTH_HOST_CAPACITY_TYPE_TO_ORDER") {
            self.host_capacity_type_to_order = kind.parse()?;
        }

        if let Ok(tags) = std::env::var("BERTH_IMPLICIT_HOST_TAGS") {
            self.implicit_host_tags = parse_tag_list(&tags);
        }

        if let Some(value) = parse_f64_from_env("BERTH_USER_DISPERSION_WEIGHT")? {
            self.user_dispersion_weight = value;
        }

        if let Some(value) = parse_bool_from_env("BERTH_ALLOW_ROUTER_ON_DISABLED")? {
            self.allow_router_on_disabled_resources = value;
        }

        if let Some(value) = parse_bool_from_env("BERTH_ALLOW_ADMIN_VM_ON_DISABLED")? {
            self.allow_admin_vm_on_disabled_resources = value;
        }

        if let Ok(pool) = std::env::var("BERTH_PREFERRED_STORAGE_POOL") {
            self.preferred_storage_pool = Some(pool).filter(|p| !p.trim().is_empty());
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> BerthResult<()> {
        for (field, value) in [
            ("planner.cluster_cpu_disable_threshold", self.cluster_cpu_disable_threshold),
            (
                "planner.cluster_memory_disable_threshold",
                self.cluster_memory_disable_threshold,
            ),
            ("planner.user_dispersion_weight", self.user_dispersion_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(BerthError::invalid_config(
                    field,
                    value,
                    "must be between 0.0 and 1.0",
                ));
            }
        }

        if self.bare_metal_planner.trim().is_empty() {
            return Err(BerthError::configuration(
                "planner.bare_metal_planner",
                "planner name cannot be empty",
            ));
        }

        Ok(())
    }

    /// Name of the planner used when neither the caller nor the service
    /// offering names one.
    pub fn default_planner_name(&self) -> &str {
        if let Some(name) = &self.default_planner {
            return name;
        }
        match self.allocation_algorithm {
            AllocationAlgorithm::UserDispersing => crate::planner::USER_DISPERSING_PLANNER,
            AllocationAlgorithm::UserConcentratedPod => crate::planner::USER_CONCENTRATED_POD_PLANNER,
            _ => crate::planner::FIRST_FIT_PLANNER,
        }
    }

    /// Preferred pool UUID for an account, falling back to the global setting
    pub fn preferred_storage_pool_for(&self, account: AccountId) -> Option<&str> {
        self.account_preferred_storage_pools
            .get(&account)
            .or(self.preferred_storage_pool.as_ref())
            .map(String::as_str)
    }
}

pub(crate) fn parse_tag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_planner_follows_algorithm() {
        let mut config = PlannerConfig::default();
        assert_eq!(config.default_planner_name(), "FirstFitPlanner");

        config.allocation_algorithm = AllocationAlgorithm::UserDispersing;
        assert_eq!(config.default_planner_name(), "UserDispersingPlanner");

        config.default_planner = Some("ImplicitDedicationPlanner".to_string());
        assert_eq!(config.default_planner_name(), "ImplicitDedicationPlanner");
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "FirstFit".parse::<AllocationAlgorithm>().unwrap(),
            AllocationAlgorithm::FirstFit
        );
        assert!("bestfit".parse::<AllocationAlgorithm>().is_err());
    }

    #[test]
    fn test_tag_list_parsing() {
        assert_eq!(parse_tag_list(" GPU, ,fpga"), vec!["GPU", "fpga"]);
    }

    #[test]
    fn test_account_preferred_pool_overrides_global() {
        let mut config = PlannerConfig::default();
        config.preferred_storage_pool = Some("global".to_string());
        config
            .account_preferred_storage_pools
            .insert(7, "mine".to_string());

        assert_eq!(config.preferred_storage_pool_for(7), Some("mine"));
        assert_eq!(config.preferred_storage_pool_for(8), Some("global"));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = PlannerConfig::default();
        config.cluster_cpu_disable_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
