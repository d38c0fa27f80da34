//! fleet.toml configuration.
//!
//! Every section is optional; missing values fall back to defaults.
//!
//! ```toml
//! [cache]
//! ttl_ms = 10000
//! retry_backoff_ms = 1000
//!
//! [lock]
//! timeout_ms = 5000
//! retries = 2
//! retry_backoff_ms = 50
//!
//! [policy]
//! default_min_available = { percent = 50.0 }
//! protected_applications = ["hosted-vespa:zone-config-servers"]
//!
//! [policy.service_types.searchnode]
//! min_available = { count = 2 }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleet_lock::LockOptions;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub cache: CacheConfig,
    pub lock: LockConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a topology snapshot is served before a refresh.
    pub ttl_ms: u64,
    /// Wait after a failed refresh before trying again.
    pub retry_backoff_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 10_000,
            retry_backoff_ms: 1_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retries: 2,
            retry_backoff_ms: 50,
        }
    }
}

impl LockConfig {
    pub fn options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Minimum number of healthy instances a cluster must keep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinAvailability {
    /// An absolute instance count.
    Count(u32),
    /// A percentage of the cluster's size, rounded up.
    Percent(f64),
}

impl Default for MinAvailability {
    fn default() -> Self {
        Self::Percent(50.0)
    }
}

impl MinAvailability {
    /// Required healthy instances for a cluster of `cluster_size`, capped at
    /// the cluster size.
    pub fn required(&self, cluster_size: usize) -> usize {
        let required = match *self {
            Self::Count(n) => n as usize,
            Self::Percent(p) => {
                let p = p.clamp(0.0, 100.0);
                (cluster_size as f64 * p / 100.0).ceil() as usize
            }
        };
        required.min(cluster_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTypePolicy {
    pub min_available: MinAvailability,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Applied to every cluster without a service-type override.
    pub default_min_available: MinAvailability,
    /// Per service type overrides, keyed by service type name.
    pub service_types: HashMap<String, ServiceTypePolicy>,
    /// Applications (`tenant:instance`) that may never be suspended as a whole.
    pub protected_applications: Vec<String>,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        Ok(config)
    }
}
