//! Coordinator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Point, Result};

/// Default collector poll interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Default maximum time to wait for a quorum
pub const DEFAULT_MAX_WAIT_MS: u64 = 5_000;

/// Timing and disclosure policy of signature collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorConfig {
    /// Interval between collection attempts
    pub poll_interval_ms: u64,
    /// Time after which collection gives up
    pub max_wait_ms: u64,
    /// Return the collected partial signatures when the quorum times out
    pub expose_partials_on_timeout: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            expose_partials_on_timeout: false,
        }
    }
}

impl CoordinatorConfig {
    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Maximum wait
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Reject unusable timings
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("pollIntervalMs must be positive".into()));
        }
        if self.max_wait_ms < self.poll_interval_ms {
            return Err(Error::InvalidConfig(
                "maxWaitMs must be at least pollIntervalMs".into(),
            ));
        }
        Ok(())
    }
}

/// Network-wide constants for the current epoch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkParams {
    /// Key every aggregate signature must verify against
    pub group_public_key: Point,
}
