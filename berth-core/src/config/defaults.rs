//! Default configuration values for Berth
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Planner defaults
pub const DEFAULT_BARE_METAL_PLANNER: &str = "BareMetalPlanner";
pub const DEFAULT_CLUSTER_CPU_DISABLE_THRESHOLD: f64 = 0.85;
pub const DEFAULT_CLUSTER_MEMORY_DISABLE_THRESHOLD: f64 = 0.85;
pub const DEFAULT_IMPLICIT_HOST_TAGS: &str = "GPU";
pub const DEFAULT_USER_DISPERSION_WEIGHT: f64 = 1.0;

// Host reservation defaults
pub const DEFAULT_HOST_RESERVATION_RELEASE_PERIOD_MS: u64 = 300_000; // 5 minutes
pub const DEFAULT_VM_CAPACITY_RELEASE_INTERVAL_SECS: u64 = 3600; // 1 hour

// Storage defaults
pub const DEFAULT_POOL_DISABLE_THRESHOLD: f64 = 0.85;
pub const DEFAULT_STORAGE_OVERPROVISIONING_FACTOR: f64 = 2.0;

// Helper functions for Duration creation
pub const fn duration_ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
