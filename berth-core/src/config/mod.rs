//! Configuration module for Berth
//!
//! This module provides a structured configuration system with sensible defaults,
//! TOML file loading, environment variable overrides and validation.

use crate::error::{BerthError, BerthResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod defaults;
pub mod planner;
pub mod reservation;
pub mod storage;

pub use defaults::*;
pub use planner::{AllocationAlgorithm, PlannerConfig};
pub use reservation::ReservationConfig;
pub use storage::StorageConfig;

/// Root configuration structure for Berth
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BerthConfig {
    /// Deployment planner configuration
    pub planner: PlannerConfig,

    /// Host reservation ledger configuration
    pub reservation: ReservationConfig,

    /// Storage pool capacity configuration
    pub storage: StorageConfig,
}

impl BerthConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> BerthResult<Self> {
        let config = Self {
            planner: PlannerConfig::from_env()?,
            reservation: ReservationConfig::from_env()?,
            storage: StorageConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> BerthResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BerthError::configuration(
                "config_file",
                format!("Failed to read {}: {}", path.display(), e),
            )
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without consulting the environment
    pub fn from_toml_str(content: &str) -> BerthResult<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> BerthResult<()> {
        self.planner.apply_env_overrides()?;
        self.reservation.apply_env_overrides();
        self.storage.apply_env_overrides()?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> BerthResult<()> {
        self.planner.validate()?;
        self.reservation.validate()?;
        self.storage.validate()?;
        Ok(())
    }

    /// Create a test configuration with deterministic host ordering
    pub fn test() -> Self {
        let mut config = Self::default();
        config.planner.allocation_algorithm = AllocationAlgorithm::FirstFit;
        config.reservation.release_period = Duration::from_millis(50);
        config
    }
}

/// Builder for BerthConfig
#[derive(Debug, Default)]
pub struct BerthConfigBuilder {
    config: BerthConfig,
}

impl BerthConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn planner(mut self, planner: PlannerConfig) -> Self {
        self.config.planner = planner;
        self
    }

    pub fn reservation(mut self, reservation: ReservationConfig) -> Self {
        self.config.reservation = reservation;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn allocation_algorithm(mut self, algorithm: AllocationAlgorithm) -> Self {
        self.config.planner.allocation_algorithm = algorithm;
        self
    }

    pub fn default_planner(mut self, name: impl Into<String>) -> Self {
        self.config.planner.default_planner = Some(name.into());
        self
    }

    pub fn build(self) -> BerthResult<BerthConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Helper functions for environment parsing
pub(crate) fn parse_duration_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

pub(crate) fn parse_duration_secs_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

pub(crate) fn parse_f64_from_env(key: &str) -> BerthResult<Option<f64>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| BerthError::invalid_config(key, raw, "expected a number")),
        Err(_) => Ok(None),
    }
}

pub(crate) fn parse_bool_from_env(key: &str) -> BerthResult<Option<bool>> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(BerthError::invalid_config(key, raw, "expected true or false")),
        },
        Err(_) => Ok(None),
    }
}
