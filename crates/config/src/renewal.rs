//! Renewal scheduler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Renewal sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RenewalConfig {
    /// Hours between sweeps
    #[validate(range(min = 1, max = 720))]
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Certificates expiring within this many days are renewed
    #[validate(range(min = 1, max = 89))]
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Concurrent renewals per sweep
    #[validate(range(min = 1, max = 64))]
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Sweep once immediately when the daemon starts
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

impl RenewalConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            window_days: default_window_days(),
            workers: default_workers(),
            run_on_start: default_run_on_start(),
        }
    }
}

pub(crate) fn default_interval_hours() -> u64 {
    24
}

pub(crate) fn default_window_days() -> u32 {
    30
}

pub(crate) fn default_workers() -> usize {
    4
}

pub(crate) fn default_run_on_start() -> bool {
    true
}
