//! Per-owner byte accounting.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::config::VaultConfig;
use crate::database::{nodes, users, Database};
use crate::error::{Result, VaultError};
use crate::types::{from_db_size, now_millis, to_db_size, OwnerId};

/// Granted and consumed bytes for one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub total_quota: u64,
    pub total_used: u64,
}

impl Usage {
    pub fn remaining(&self) -> u64 {
        self.total_quota.saturating_sub(self.total_used)
    }

    /// Used share of the quota, 0.0 to 100.0 (can exceed 100 after a quota cut).
    pub fn percentage(&self) -> f64 {
        if self.total_quota == 0 {
            return 0.0;
        }
        self.total_used as f64 / self.total_quota as f64 * 100.0
    }
}

#[derive(Debug, Clone)]
pub struct QuotaLedger {
    db: Database,
    default_quota: u64,
    min_quota: u64,
}

impl QuotaLedger {
    pub fn new(db: Database, config: &VaultConfig) -> Self {
        Self {
            db,
            default_quota: config.default_quota,
            min_quota: config.min_quota,
        }
    }

    /// Create the owner's account if missing. Existing accounts are left as is.
    pub async fn open_account(&self, owner: OwnerId, quota: Option<u64>) -> Result<Usage> {
        let quota = quota.unwrap_or(self.default_quota);
        let created =
            users::insert_if_missing(self.db.pool(), owner, to_db_size(quota)?, now_millis()).await?;
        if created {
            info!(owner = %owner, quota = quota, "account opened");
        }
        self.usage(owner).await
    }

    pub async fn usage(&self, owner: OwnerId) -> Result<Usage> {
        users::usage(self.db.pool(), owner)
            .await?
            .ok_or_else(|| account_not_found(owner))
    }

    /// Fail fast when `bytes` can't fit right now. The charge itself is
    /// taken later, atomically, with [`reserve_in`].
    pub(crate) async fn ensure_room(&self, owner: OwnerId, bytes: u64) -> Result<()> {
        let usage = self.usage(owner).await?;
        if usage.remaining() < bytes {
            return Err(VaultError::QuotaExceeded {
                requested: bytes,
                available: usage.remaining(),
            });
        }
        Ok(())
    }

    /// Take `bytes` from the owner's remaining quota; `false` if they don't fit.
    pub async fn reserve(&self, owner: OwnerId, bytes: u64) -> Result<bool> {
        let mut conn = self.db.acquire().await?;
        match reserve_in(&mut conn, owner, bytes).await {
            Ok(()) => Ok(true),
            Err(VaultError::QuotaExceeded { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn release(&self, owner: OwnerId, bytes: u64) -> Result<()> {
        let mut conn = self.db.acquire().await?;
        release_in(&mut conn, owner, bytes).await
    }

    /// Reset usage to the sum of the owner's active file sizes.
    pub async fn recompute(&self, owner: OwnerId) -> Result<u64> {
        let mut tx = self.db.begin_write().await?;
        let used = recompute_in(&mut tx, owner).await?;
        tx.commit().await?;
        Ok(used)
    }

    pub async fn set_quota(&self, owner: OwnerId, total: u64) -> Result<Usage> {
        if total < self.min_quota {
            return Err(VaultError::InvalidInput(format!(
                "quota must be at least {} bytes",
                self.min_quota
            )));
        }
        if !users::set_quota(self.db.pool(), owner, to_db_size(total)?, now_millis()).await? {
            return Err(account_not_found(owner));
        }
        info!(owner = %owner, quota = total, "quota updated");
        self.usage(owner).await
    }
}

fn account_not_found(owner: OwnerId) -> VaultError {
    VaultError::NotFound(format!("account {owner}"))
}

/// Atomic check-and-add on the connection (or transaction) given.
pub(crate) async fn reserve_in(conn: &mut SqliteConnection, owner: OwnerId, bytes: u64) -> Result<()> {
    if users::reserve(&mut *conn, owner, to_db_size(bytes)?, now_millis()).await? {
        debug!(owner = %owner, bytes = bytes, "quota reserved");
        return Ok(());
    }

    let usage = users::usage(&mut *conn, owner)
        .await?
        .ok_or_else(|| account_not_found(owner))?;
    Err(VaultError::QuotaExceeded {
        requested: bytes,
        available: usage.remaining(),
    })
}

/// Subtract `bytes`; a release larger than recorded usage is drift, fixed
/// by recomputing from the node table.
pub(crate) async fn release_in(conn: &mut SqliteConnection, owner: OwnerId, bytes: u64) -> Result<()> {
    if bytes == 0 {
        return Ok(());
    }
    if users::release(&mut *conn, owner, to_db_size(bytes)?, now_millis()).await? {
        debug!(owner = %owner, bytes = bytes, "quota released");
        return Ok(());
    }

    if users::usage(&mut *conn, owner).await?.is_none() {
        return Err(account_not_found(owner));
    }
    warn!(owner = %owner, bytes = bytes, "quota release exceeds recorded usage, recomputing");
    recompute_in(conn, owner).await?;
    Ok(())
}

pub(crate) async fn recompute_in(conn: &mut SqliteConnection, owner: OwnerId) -> Result<u64> {
    let before = users::usage(&mut *conn, owner)
        .await?
        .ok_or_else(|| account_not_found(owner))?;
    let actual = nodes::active_file_bytes(&mut *conn, owner).await?;
    users::set_used(&mut *conn, owner, actual, now_millis()).await?;

    let actual = from_db_size(actual);
    if actual != before.total_used {
        warn!(
            owner = %owner,
            recorded = before.total_used,
            actual = actual,
            "quota drift corrected"
        );
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_math() {
        let usage = Usage {
            total_quota: 200,
            total_used: 50,
        };
        assert_eq!(usage.remaining(), 150);
        assert!((usage.percentage() - 25.0).abs() < f64::EPSILON);

        let over = Usage {
            total_quota: 10,
            total_used: 20,
        };
        assert_eq!(over.remaining(), 0);

        let empty = Usage {
            total_quota: 0,
            total_used: 0,
        };
        assert_eq!(empty.percentage(), 0.0);
    }

    #[tokio::test]
    async fn test_reserve_respects_ceiling() {
        let db = Database::in_memory().await.unwrap();
        let config = VaultConfig {
            min_quota: 10,
            ..VaultConfig::default()
        };
        let ledger = QuotaLedger::new(db, &config);
        let owner = OwnerId(1);
        ledger.open_account(owner, Some(100)).await.unwrap();

        assert!(ledger.reserve(owner, 60).await.unwrap());
        assert!(!ledger.reserve(owner, 41).await.unwrap());
        assert!(ledger.reserve(owner, 40).await.unwrap());
        assert_eq!(ledger.usage(owner).await.unwrap().total_used, 100);

        ledger.release(owner, 30).await.unwrap();
        assert_eq!(ledger.usage(owner).await.unwrap().total_used, 70);
    }

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        let ledger = QuotaLedger::new(db, &VaultConfig::default());
        let owner = OwnerId(9);

        let first = ledger.open_account(owner, Some(5 << 30)).await.unwrap();
        let again = ledger.open_account(owner, Some(1 << 30)).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(again.total_quota, 5 << 30);
    }

    #[tokio::test]
    async fn test_set_quota_floor() {
        let db = Database::in_memory().await.unwrap();
        let ledger = QuotaLedger::new(db, &VaultConfig::default());
        let owner = OwnerId(2);
        ledger.open_account(owner, None).await.unwrap();

        let result = ledger.set_quota(owner, 1024).await;
        assert!(matches!(result, Err(VaultError::InvalidInput(_))));

        let usage = ledger.set_quota(owner, 2 << 30).await.unwrap();
        assert_eq!(usage.total_quota, 2 << 30);

        let missing = ledger.set_quota(OwnerId(3), 2 << 30).await;
        assert!(matches!(missing, Err(VaultError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_release_drift_is_recomputed() {
        let db = Database::in_memory().await.unwrap();
        let ledger = QuotaLedger::new(db, &VaultConfig::default());
        let owner = OwnerId(4);
        ledger.open_account(owner, None).await.unwrap();
        ledger.reserve(owner, 10).await.unwrap();

        // No file nodes back those 10 bytes, so an over-release resets to 0
        ledger.release(owner, 25).await.unwrap();
        assert_eq!(ledger.usage(owner).await.unwrap().total_used, 0);
    }
}
