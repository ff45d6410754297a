//! Host reservation configuration

use super::defaults::*;
use super::{parse_duration_from_env, parse_duration_secs_from_env};
use crate::error::{BerthError, BerthResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host reservation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// Period of the background release sweep
    #[serde(with = "humantime_serde")]
    pub release_period: Duration,

    /// Grace window after a VM stops during which its last host still
    /// counts as in use
    #[serde(with = "humantime_serde")]
    pub vm_capacity_release_interval: Duration,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            release_period: duration_ms(DEFAULT_HOST_RESERVATION_RELEASE_PERIOD_MS),
            vm_capacity_release_interval: duration_secs(DEFAULT_VM_CAPACITY_RELEASE_INTERVAL_SECS),
        }
    }
}

impl ReservationConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BerthResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) {
        self.release_period =
            parse_duration_from_env("BERTH_HOST_RESERVATION_RELEASE_PERIOD_MS", self.release_period);
        self.vm_capacity_release_interval = parse_duration_secs_from_env(
            "BERTH_VM_CAPACITY_RELEASE_INTERVAL_SECS",
            self.vm_capacity_release_interval,
        );
    }

    /// Validate the configuration
    pub fn validate(&self) -> BerthResult<()> {
        if self.release_period.is_zero() {
            return Err(BerthError::configuration(
                "reservation.release_period",
                "release period must be non-zero",
            ));
        }
        Ok(())
    }

    /// Grace window as a chrono duration for timestamp arithmetic
    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.vm_capacity_release_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_VM_CAPACITY_RELEASE_INTERVAL_SECS as i64))
    }
}
