//! Content-addressed deduplication index.
//!
//! One [`ContentEntry`] per digest maps to the single stored blob for those
//! bytes and counts the nodes that reference it. Count changes are atomic
//! SQL updates; the in-process digest lock additionally serializes the
//! lookup/put/register sequence of uploads against reclamation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use object_store::BlobStore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{RetryPolicy, VaultConfig};
use crate::database::{content, nodes, Database};
use crate::error::{Result, VaultError};
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::types::{from_db_size, now_millis, to_db_size, Digest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentEntry {
    pub digest: Digest,
    #[serde(skip)]
    pub storage_key: String,
    pub size: u64,
    pub mime_type: String,
    pub reference_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of [`ContentIndex::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub entry: ContentEntry,
    /// `false` when an existing entry absorbed the registration
    pub created: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub reclaimed: usize,
    pub failed: usize,
}

/// Outcome of [`ContentIndex::recount`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecountReport {
    pub checked: usize,
    /// entries whose stored count disagreed with the node table
    pub corrected: usize,
    pub reclaimed: usize,
}

#[derive(Debug, Clone)]
pub struct ContentIndex {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    locks: KeyedLocks,
    retry: RetryPolicy,
}

impl ContentIndex {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, config: &VaultConfig) -> Self {
        Self {
            db,
            blobs,
            locks: KeyedLocks::new(),
            retry: config.purge_retry,
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Exclusive access to `digest` within this process.
    pub(crate) async fn lock(&self, digest: &Digest) -> KeyedGuard {
        self.locks.lock(digest.as_str()).await
    }

    pub async fn lookup(&self, digest: &Digest) -> Result<Option<ContentEntry>> {
        let entry = content::get(self.db.pool(), digest).await?;
        debug!(digest = %digest, hit = entry.is_some(), "content lookup");
        Ok(entry)
    }

    /// Record a freshly stored blob with one reference. If the digest is
    /// already indexed the existing entry gains the reference instead and the
    /// caller's blob is surplus.
    pub async fn register(
        &self,
        digest: &Digest,
        storage_key: &str,
        size: u64,
        mime_type: &str,
    ) -> Result<Registration> {
        let entry = content::register(
            self.db.pool(),
            digest,
            storage_key,
            to_db_size(size)?,
            mime_type,
            now_millis(),
        )
        .await?
        .ok_or_else(|| {
            VaultError::inconsistent(format!("content {digest} is pending reclamation"))
        })?;

        let created = entry.storage_key == storage_key && entry.reference_count == 1;
        if created {
            info!(digest = %digest, size = size, "content registered");
        } else {
            debug!(
                digest = %digest,
                references = entry.reference_count,
                "content already registered"
            );
        }
        Ok(Registration { entry, created })
    }

    /// New reference count, or `None` if the entry is absent or pending
    /// reclamation.
    pub(crate) async fn try_increment(&self, digest: &Digest) -> Result<Option<u64>> {
        let count = content::increment(self.db.pool(), digest, now_millis()).await?;
        Ok(count.map(from_db_size))
    }

    pub async fn increment_reference(&self, digest: &Digest) -> Result<u64> {
        self.try_increment(digest)
            .await?
            .ok_or_else(|| VaultError::content_not_found(digest))
    }

    /// Drop one reference; the last one removes the blob and the entry.
    ///
    /// If the blob can't be removed the entry stays at zero references and
    /// the failure is returned; [`ContentIndex::reclaim_orphans`] retries it.
    pub async fn decrement_reference(&self, digest: &Digest) -> Result<u64> {
        let count = content::decrement(self.db.pool(), digest, now_millis())
            .await?
            .ok_or_else(|| {
                VaultError::inconsistent(format!(
                    "reference count of content {digest} would go negative"
                ))
            })?;
        let count = from_db_size(count);
        debug!(digest = %digest, references = count, "content reference dropped");

        if count == 0 {
            self.reclaim(digest).await?;
        }
        Ok(count)
    }

    /// Remove an unreferenced entry and its blob. `false` if there was
    /// nothing to reclaim.
    pub(crate) async fn reclaim(&self, digest: &Digest) -> Result<bool> {
        let _guard = self.lock(digest).await;
        self.reclaim_locked(digest).await
    }

    /// [`ContentIndex::reclaim`] for callers already holding the digest lock.
    pub(crate) async fn reclaim_locked(&self, digest: &Digest) -> Result<bool> {
        let Some(entry) = content::get(self.db.pool(), digest).await? else {
            return Ok(false);
        };
        if entry.reference_count > 0 {
            return Ok(false);
        }

        self.remove_blob(&entry.storage_key).await?;
        let deleted = content::delete_unreferenced(self.db.pool(), digest).await?;
        if deleted {
            info!(digest = %digest, size = entry.size, "content reclaimed");
        }
        Ok(deleted)
    }

    /// Retry blob removal for every entry left at zero references.
    pub async fn reclaim_orphans(&self) -> Result<ReclaimReport> {
        let pending = content::unreferenced(self.db.pool()).await?;
        let mut report = ReclaimReport::default();

        for entry in pending {
            match self.reclaim(&entry.digest).await {
                Ok(true) => report.reclaimed += 1,
                Ok(false) => {}
                Err(VaultError::StorageFailure { key, source }) => {
                    warn!(digest = %entry.digest, key = %key, error = %source, "orphan reclaim failed");
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if report.reclaimed > 0 || report.failed > 0 {
            info!(
                reclaimed = report.reclaimed,
                failed = report.failed,
                "orphaned content swept"
            );
        }
        Ok(report)
    }

    /// Reset every entry's reference count to the number of unpurged nodes
    /// carrying its digest. Entries left with no references are reclaimed.
    pub async fn recount(&self) -> Result<RecountReport> {
        let digests = content::digests(self.db.pool()).await?;
        let mut report = RecountReport::default();

        for digest in digests {
            let _guard = self.lock(&digest).await;
            let mut tx = self.db.begin_write().await?;
            let Some(entry) = content::get(&mut *tx, &digest).await? else {
                continue;
            };
            report.checked += 1;

            let actual = nodes::count_by_digest(&mut *tx, &digest).await?;
            if from_db_size(actual) != entry.reference_count {
                content::set_reference_count(&mut *tx, &digest, actual, now_millis()).await?;
                warn!(
                    digest = %digest,
                    recorded = entry.reference_count,
                    actual = actual,
                    "reference count drift corrected"
                );
                report.corrected += 1;
            }
            tx.commit().await?;

            if actual == 0 && self.reclaim_locked(&digest).await? {
                report.reclaimed += 1;
            }
        }

        info!(
            checked = report.checked,
            corrected = report.corrected,
            reclaimed = report.reclaimed,
            "reference counts verified"
        );
        Ok(report)
    }

    /// Remove the blob an abandoned upload wrote under `key`, unless the
    /// upload's transaction registered it after all.
    pub(crate) async fn discard_upload(&self, digest: &Digest, key: &str) -> Result<()> {
        // Taking the write lock waits out a commit still in flight
        let mut tx = self.db.begin_write().await?;
        let entry = content::get(&mut *tx, digest).await?;
        tx.rollback().await?;

        if entry.is_some_and(|e| e.storage_key == key) {
            debug!(key = %key, "abandoned upload committed, blob kept");
            return Ok(());
        }
        self.remove_blob(key).await?;
        debug!(key = %key, "abandoned upload blob removed");
        Ok(())
    }

    /// Delete a blob, backing off exponentially between attempts.
    pub(crate) async fn remove_blob(&self, key: &str) -> Result<()> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.blobs.remove(key).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 >= attempts => {
                    warn!(key = %key, attempts = attempts, error = %e, "blob removal failed");
                    return Err(VaultError::storage(key, e));
                }
                Err(e) => {
                    let delay = self.retry.delay(attempt);
                    debug!(key = %key, attempt = attempt, error = %e, "blob removal failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
