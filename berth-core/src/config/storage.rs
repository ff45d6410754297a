//! Storage pool capacity configuration

use super::defaults::*;
use super::parse_f64_from_env;
use crate::error::{BerthError, BerthResult};
use serde::{Deserialize, Serialize};

/// Storage pool capacity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Allocated fraction above which a pool no longer accepts volumes
    pub pool_disable_threshold: f64,

    /// Multiplier applied to the capacity of shared thin-provisioned pools
    pub overprovisioning_factor: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pool_disable_threshold: DEFAULT_POOL_DISABLE_THRESHOLD,
            overprovisioning_factor: DEFAULT_STORAGE_OVERPROVISIONING_FACTOR,
        }
    }
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BerthResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) -> BerthResult<()> {
        if let Some(value) = parse_f64_from_env("BERTH_POOL_DISABLE_THRESHOLD")? {
            self.pool_disable_threshold = value;
        }
        if let Some(value) = parse_f64_from_env("BERTH_STORAGE_OVERPROVISIONING_FACTOR")? {
            self.overprovisioning_factor = value;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> BerthResult<()> {
        if !(0.0..=1.0).contains(&self.pool_disable_threshold) {
            return Err(BerthError::invalid_config(
                "storage.pool_disable_threshold",
                self.pool_disable_threshold,
                "must be between 0.0 and 1.0",
            ));
        }
        if self.overprovisioning_factor < 1.0 {
            return Err(BerthError::invalid_config(
                "storage.overprovisioning_factor",
                self.overprovisioning_factor,
                "must be at least 1.0",
            ));
        }
        Ok(())
    }
}
