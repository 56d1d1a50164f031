//! Soft delete, restore and purge.
//!
//! Trashing marks a node and its active descendants with one `deleted_at` and
//! the id of the node the user trashed (the trash root). Restore brings back
//! exactly that group. Purge removes rows for good, dropping one content
//! reference per file in the same transaction as the row delete; blobs are
//! removed only after commit.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::content::ContentIndex;
use crate::database::{content, nodes, Database};
use crate::error::{Result, VaultError};
use crate::quota;
use crate::tree::{active_node, insert_error, Node, NodeTree};
use crate::types::{from_db_size, now_millis, Digest, NodeId, OwnerId};

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub nodes: usize,
    pub blobs_reclaimed: usize,
}

impl PurgeReport {
    fn absorb(&mut self, other: PurgeReport) {
        self.nodes += other.nodes;
        self.blobs_reclaimed += other.blobs_reclaimed;
    }
}

#[derive(Debug, Clone)]
pub struct TrashLifecycle {
    db: Database,
    tree: NodeTree,
    content: ContentIndex,
}

impl TrashLifecycle {
    pub fn new(db: Database, tree: NodeTree, content: ContentIndex) -> Self {
        Self { db, tree, content }
    }

    /// Move `id` and its active subtree to the trash, releasing their bytes
    /// from the owner's quota. Content references are kept.
    pub async fn trash(&self, owner: OwnerId, id: NodeId) -> Result<Node> {
        let mut tx = self.db.begin_write().await?;
        active_node(&mut tx, owner, id).await?;

        let bytes = from_db_size(nodes::active_subtree_bytes(&mut *tx, id).await?);
        let count = nodes::trash_subtree(&mut *tx, id, now_millis()).await?;
        quota::release_in(&mut tx, owner, bytes).await?;
        let node = nodes::get(&mut *tx, owner, id)
            .await?
            .ok_or_else(|| VaultError::node_not_found(id))?;
        tx.commit().await?;

        info!(owner = %owner, node = %id, nodes = count, bytes = bytes, "moved to trash");
        Ok(node)
    }

    /// Bring a trash root and everything trashed with it back.
    ///
    /// Lands under the original parent when that is still an active folder
    /// with room for the subtree, otherwise at the root level.
    pub async fn restore(&self, owner: OwnerId, id: NodeId) -> Result<Node> {
        let mut tx = self.db.begin_write().await?;
        let node = nodes::get(&mut *tx, owner, id)
            .await?
            .filter(|n| n.is_deleted)
            .ok_or_else(|| not_in_trash(id))?;
        if !node.is_trash_root() {
            return Err(VaultError::InvalidInput(format!(
                "node {id} was trashed as part of node {}; restore that instead",
                node.trash_root.map(|r| r.to_string()).unwrap_or_default()
            )));
        }

        let target = match node.parent {
            None => None,
            Some(parent) => match self.tree.parent_chain(&mut tx, owner, parent).await {
                Ok(chain) => {
                    let height = nodes::subtree_height(&mut *tx, id).await?;
                    let depth = chain.len() + usize::try_from(height).unwrap_or(usize::MAX);
                    if depth >= self.tree.limits().max_depth {
                        warn!(owner = %owner, node = %id, "original parent too deep, restoring to root");
                        None
                    } else {
                        Some(parent)
                    }
                }
                Err(VaultError::ParentInvalid(_)) => {
                    debug!(owner = %owner, node = %id, parent = %parent, "original parent gone, restoring to root");
                    None
                }
                Err(e) => return Err(e),
            },
        };

        if nodes::name_taken(&mut *tx, owner, target, &node.name, Some(id)).await? {
            return Err(VaultError::NameConflict(node.name));
        }

        let bytes = from_db_size(nodes::trashed_group_bytes(&mut *tx, id).await?);
        quota::reserve_in(&mut tx, owner, bytes).await?;

        let now = now_millis();
        let restored = nodes::restore_root(&mut *tx, id, target, now)
            .await
            .map_err(|e| insert_error(e, owner, &node.name))?;
        if !restored {
            return Err(not_in_trash(id));
        }
        let count = nodes::restore_group(&mut *tx, id, now).await? + 1;
        let node = active_node(&mut tx, owner, id).await?;
        tx.commit().await?;

        info!(owner = %owner, node = %id, nodes = count, bytes = bytes, "restored from trash");
        Ok(node)
    }

    /// Permanently delete a trashed node and its subtree.
    ///
    /// A missing id is a no-op so an interrupted purge can simply be re-run.
    /// An id that belongs to another owner is not found.
    pub async fn purge(&self, owner: OwnerId, id: NodeId) -> Result<PurgeReport> {
        let Some(root) = nodes::get(self.db.pool(), owner, id).await? else {
            if nodes::get_any(self.db.pool(), id).await?.is_some() {
                return Err(VaultError::node_not_found(id));
            }
            debug!(owner = %owner, node = %id, "purge of absent node");
            return Ok(PurgeReport::default());
        };
        if root.is_active() {
            return Err(not_in_trash(id));
        }

        let subtree = nodes::subtree_deepest_first(self.db.pool(), id).await?;
        if let Some(live) = subtree.iter().find(|n| n.is_active()) {
            return Err(VaultError::inconsistent(format!(
                "active node {} sits below trashed node {id}",
                live.id
            )));
        }

        let mut report = PurgeReport::default();
        let mut unreferenced: Vec<Digest> = Vec::new();
        let mut loose_keys: Vec<String> = Vec::new();

        for node in subtree {
            let mut tx = self.db.begin_write().await?;
            let Some(deleted) = nodes::delete_trashed(&mut *tx, node.id).await? else {
                // purged concurrently
                continue;
            };
            match &deleted.digest {
                Some(digest) => {
                    let count = content::decrement(&mut *tx, digest, now_millis())
                        .await?
                        .ok_or_else(|| {
                            VaultError::inconsistent(format!(
                                "reference count of content {digest} would go negative"
                            ))
                        })?;
                    if count == 0 {
                        unreferenced.push(digest.clone());
                    }
                }
                None => {
                    if let Some(key) = &deleted.storage_key {
                        loose_keys.push(key.clone());
                    }
                }
            }
            tx.commit().await?;
            report.nodes += 1;
        }

        let mut failure = None;
        for digest in &unreferenced {
            match self.content.reclaim(digest).await {
                Ok(true) => report.blobs_reclaimed += 1,
                Ok(false) => {}
                Err(e @ VaultError::StorageFailure { .. }) => {
                    failure.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        for key in &loose_keys {
            if nodes::storage_key_in_use(self.db.pool(), key).await? {
                continue;
            }
            match self.content.remove_blob(key).await {
                Ok(()) => report.blobs_reclaimed += 1,
                Err(e @ VaultError::StorageFailure { .. }) => {
                    failure.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            owner = %owner,
            node = %id,
            nodes = report.nodes,
            blobs = report.blobs_reclaimed,
            "purged"
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Purge every trash root of `owner`.
    pub async fn empty(&self, owner: OwnerId) -> Result<PurgeReport> {
        let roots = nodes::trash_roots(self.db.pool(), owner).await?;
        let mut report = PurgeReport::default();
        let mut failure = None;

        for root in roots {
            match self.purge(owner, root.id).await {
                Ok(r) => report.absorb(r),
                Err(e @ VaultError::StorageFailure { .. }) => {
                    failure.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Trash roots of `owner`, most recently deleted first.
    pub async fn list(&self, owner: OwnerId) -> Result<Vec<Node>> {
        Ok(nodes::trash_roots(self.db.pool(), owner).await?)
    }
}

fn not_in_trash(id: NodeId) -> VaultError {
    VaultError::NotFound(format!("node {id} in trash"))
}
