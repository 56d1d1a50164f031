use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;

/// Tunables for the storage core. Every field has a default so a partial
/// `[vault]` table in a config file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Quota granted to a newly opened account
    pub default_quota: u64,
    /// Lowest quota an administrator may set
    pub min_quota: u64,
    /// Bounds on tree walks (copy, move, share scope)
    pub limits: TreeLimits,
    /// How many " (n)" suffixes to try before giving up on a copy name
    pub copy_name_attempts: u32,
    /// Lifetime of a temporary share created without an explicit expiry
    pub default_share_ttl_secs: u64,
    /// Attempts at generating an unused share code
    pub share_code_attempts: u32,
    /// Retry policy for blob removal during purge
    pub purge_retry: RetryPolicy,
    /// Lifetime of presigned download URLs
    pub presign_ttl_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            default_quota: 10 * GIB,
            min_quota: GIB,
            limits: TreeLimits::default(),
            copy_name_attempts: 1000,
            default_share_ttl_secs: 7 * 24 * 60 * 60,
            share_code_attempts: 8,
            purge_retry: RetryPolicy::default(),
            presign_ttl_secs: 60 * 60,
        }
    }
}

impl VaultConfig {
    /// `None` when the configured lifetime doesn't fit a `TimeDelta`.
    pub fn default_share_ttl(&self) -> Option<TimeDelta> {
        i64::try_from(self.default_share_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl Default for TreeLimits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_nodes: 10_000,
        }
    }
}

/// Exponential backoff: `base_delay_ms * 2^n` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}
