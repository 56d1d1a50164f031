//! The storage core wired together.
//!
//! [`Vault`] owns one of each component over a shared database and blob
//! store and implements the flows that span them: uploads (dedup, quota,
//! blob write, node), owner downloads and share-scoped reads.

use std::sync::Arc;

use bytes::Bytes;
use object_store::{BlobStore, ObjectStorage};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::VaultConfig;
use crate::content::ContentIndex;
use crate::database::nodes::{self, NewNode};
use crate::database::{content, Database};
use crate::error::{Result, VaultError};
use crate::quota::{self, QuotaLedger};
use crate::share::{Share, ShareRegistry};
use crate::trash::TrashLifecycle;
use crate::tree::{validate_name, ListOptions, Listing, Node, NodeKind, NodeTree};
use crate::types::{now_millis, to_db_size, Digest, NodeId, OwnerId};

/// A resolved share and the node it exposes.
#[derive(Debug, Clone, Serialize)]
pub struct SharedView {
    pub share: Share,
    pub node: Node,
}

#[derive(Debug, Clone)]
pub struct Vault {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    config: VaultConfig,
    tree: NodeTree,
    content: ContentIndex,
    quota: QuotaLedger,
    shares: ShareRegistry,
    trash: TrashLifecycle,
}

impl Vault {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, config: VaultConfig) -> Self {
        let tree = NodeTree::new(db.clone(), &config);
        let content = ContentIndex::new(db.clone(), blobs.clone(), &config);
        let quota = QuotaLedger::new(db.clone(), &config);
        let shares = ShareRegistry::new(db.clone(), tree.clone(), &config);
        let trash = TrashLifecycle::new(db.clone(), tree.clone(), content.clone());
        Self {
            db,
            blobs,
            config,
            tree,
            content,
            quota,
            shares,
            trash,
        }
    }

    /// In-memory database and blob store; nothing survives the process.
    pub async fn ephemeral(config: VaultConfig) -> Result<Self> {
        let db = Database::in_memory().await?;
        Ok(Self::new(db, Arc::new(ObjectStorage::memory()), config))
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn content(&self) -> &ContentIndex {
        &self.content
    }

    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    pub fn shares(&self) -> &ShareRegistry {
        &self.shares
    }

    pub fn trash(&self) -> &TrashLifecycle {
        &self.trash
    }

    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Store `data` as a new file named `name` under `parent`.
    ///
    /// Identical bytes already in the vault are referenced instead of
    /// written again. The quota charge, the content reference and the node
    /// commit together; a blob written for an upload that fails or is
    /// dropped before that commit is removed again.
    pub async fn upload(
        &self,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
        mime_type: Option<&str>,
        data: Bytes,
    ) -> Result<Node> {
        self.check_destination(owner, parent, name).await?;

        let digest = Digest::compute(&data);
        let size = data.len() as u64;
        let mime_type = mime_type
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| guess_mime(name));
        self.quota.ensure_room(owner, size).await?;

        let mut guard = UploadGuard::new(self.content.clone(), digest.clone());
        let result = self
            .store_upload(&mut guard, owner, parent, name, &mime_type, &digest, data)
            .await;
        match result {
            Ok(node) => {
                guard.disarm();
                info!(
                    owner = %owner,
                    node = %node.id,
                    digest = %digest,
                    size = size,
                    "file uploaded"
                );
                Ok(node)
            }
            Err(e) => {
                debug!(owner = %owner, name = %name, error = %e, "upload failed, rolling back");
                guard.rollback().await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_upload(
        &self,
        guard: &mut UploadGuard,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
        mime_type: &str,
        digest: &Digest,
        data: Bytes,
    ) -> Result<Node> {
        let size = data.len() as u64;

        // Held through the commit so reclamation of this digest can't interleave
        let _lock = self.content.lock(digest).await;
        let key = match self.content.lookup(digest).await? {
            Some(entry) if entry.reference_count > 0 => {
                debug!(digest = %digest, "upload deduplicated");
                entry.storage_key
            }
            pending => {
                if pending.is_some() {
                    self.content.reclaim_locked(digest).await?;
                }
                let key = format!("{owner}/{}/{name}", Uuid::new_v4().simple());
                guard.written = Some(key.clone());
                self.blobs
                    .put(&key, data, Some(mime_type))
                    .await
                    .map_err(|e| VaultError::storage(&key, e))?;
                debug!(key = %key, size = size, "blob stored");
                key
            }
        };

        let mut tx = self.db.begin_write().await?;
        quota::reserve_in(&mut tx, owner, size).await?;
        let entry = content::register(
            &mut *tx,
            digest,
            &key,
            to_db_size(size)?,
            mime_type,
            now_millis(),
        )
        .await?
        .ok_or_else(|| {
            VaultError::inconsistent(format!("content {digest} is pending reclamation"))
        })?;
        let new = NewNode {
            owner,
            parent,
            name,
            kind: NodeKind::File,
            size: to_db_size(size)?,
            mime_type: Some(mime_type),
            digest: Some(digest),
            storage_key: Some(entry.storage_key.as_str()),
        };
        let node = self.tree.insert_in(&mut tx, &new).await?;
        tx.commit().await?;

        // Another process registered the same bytes first; ours are surplus
        if let Some(surplus) = guard.written.take().filter(|k| *k != entry.storage_key) {
            if let Err(e) = self.content.remove_blob(&surplus).await {
                warn!(key = %surplus, error = %e, "surplus blob left behind");
            }
        }
        Ok(node)
    }

    /// Create a file from content already in the vault, without the bytes.
    pub async fn quick_upload(
        &self,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
        digest: &Digest,
        size: u64,
    ) -> Result<Node> {
        self.check_destination(owner, parent, name).await?;

        let _lock = self.content.lock(digest).await;
        let entry = self
            .content
            .lookup(digest)
            .await?
            .filter(|e| e.reference_count > 0)
            .ok_or_else(|| VaultError::content_not_found(digest))?;
        if entry.size != size {
            return Err(VaultError::InvalidInput(format!(
                "size {size} does not match stored content of {} bytes",
                entry.size
            )));
        }

        let now = now_millis();
        let mut tx = self.db.begin_write().await?;
        quota::reserve_in(&mut tx, owner, entry.size).await?;
        content::increment(&mut *tx, digest, now)
            .await?
            .ok_or_else(|| VaultError::content_not_found(digest))?;
        let new = NewNode {
            owner,
            parent,
            name,
            kind: NodeKind::File,
            size: to_db_size(entry.size)?,
            mime_type: Some(entry.mime_type.as_str()),
            digest: Some(digest),
            storage_key: Some(entry.storage_key.as_str()),
        };
        let node = self.tree.insert_in(&mut tx, &new).await?;
        tx.commit().await?;

        info!(owner = %owner, node = %node.id, digest = %digest, "file quick-uploaded");
        Ok(node)
    }

    /// Bytes of an active file owned by `owner`.
    pub async fn download(&self, owner: OwnerId, id: NodeId) -> Result<(Node, Bytes)> {
        let node = self.tree.get_active(owner, id).await?;
        let key = file_key(&node)?;
        let data = self
            .blobs
            .get(key)
            .await
            .map_err(|e| VaultError::storage(key, e))?;
        Ok((node, data))
    }

    /// Time-limited direct download URL for an active file.
    pub async fn presign(&self, owner: OwnerId, id: NodeId) -> Result<Url> {
        let node = self.tree.get_active(owner, id).await?;
        let key = file_key(&node)?;
        self.blobs
            .presigned_get(key, self.config.presign_ttl())
            .await
            .map_err(|e| VaultError::storage(key, e))
    }

    pub async fn open_share(&self, code: &str, password: Option<&str>) -> Result<SharedView> {
        let share = self.shares.resolve(code, password).await?;
        let node = self.tree.get_active(share.owner, share.node).await?;
        Ok(SharedView { share, node })
    }

    /// Children of a folder inside a share; `None` lists the shared folder.
    pub async fn list_shared_folder(
        &self,
        code: &str,
        password: Option<&str>,
        folder: Option<NodeId>,
        opts: &ListOptions,
    ) -> Result<Listing> {
        let share = self.shares.resolve(code, password).await?;
        let folder = folder.unwrap_or(share.node);
        self.ensure_in_scope(&share, folder).await?;
        self.tree
            .list_children(share.owner, Some(folder), opts)
            .await
    }

    pub async fn download_shared(
        &self,
        code: &str,
        password: Option<&str>,
        file: NodeId,
    ) -> Result<(Node, Bytes)> {
        let share = self.shares.resolve(code, password).await?;
        self.ensure_in_scope(&share, file).await?;
        self.download(share.owner, file).await
    }

    pub async fn presign_shared(
        &self,
        code: &str,
        password: Option<&str>,
        file: NodeId,
    ) -> Result<Url> {
        let share = self.shares.resolve(code, password).await?;
        self.ensure_in_scope(&share, file).await?;
        self.presign(share.owner, file).await
    }

    async fn ensure_in_scope(&self, share: &Share, target: NodeId) -> Result<()> {
        if self.shares.scope_check(share, target).await? {
            return Ok(());
        }
        debug!(share = %share.id, target = %target, "target outside share scope");
        Err(VaultError::node_not_found(target))
    }

    /// Fail early on a bad name, parent or sibling conflict, before any
    /// bytes are hashed or written.
    async fn check_destination(
        &self,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
    ) -> Result<()> {
        validate_name(name)?;
        let mut conn = self.db.acquire().await?;
        if let Some(parent) = parent {
            self.tree.parent_chain(&mut conn, owner, parent).await?;
        }
        if nodes::name_taken(&mut *conn, owner, parent, name, None).await? {
            return Err(VaultError::NameConflict(name.to_string()));
        }
        Ok(())
    }
}

fn file_key(node: &Node) -> Result<&str> {
    if !node.is_file() {
        return Err(VaultError::InvalidInput(format!("node {} is a folder", node.id)));
    }
    node.storage_key
        .as_deref()
        .ok_or_else(|| VaultError::inconsistent(format!("file {} has no storage key", node.id)))
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Removes the blob an upload wrote unless disarmed. Dropping an armed guard
/// (the upload future was cancelled) cleans up on a spawned task.
struct UploadGuard {
    content: ContentIndex,
    digest: Digest,
    written: Option<String>,
    armed: bool,
}

impl UploadGuard {
    fn new(content: ContentIndex, digest: Digest) -> Self {
        Self {
            content,
            digest,
            written: None,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    async fn rollback(&mut self) {
        self.armed = false;
        if let Some(key) = self.written.take() {
            discard(self.content.clone(), self.digest.clone(), key).await;
        }
    }
}

async fn discard(content: ContentIndex, digest: Digest, key: String) {
    if let Err(e) = content.discard_upload(&digest, &key).await {
        warn!(key = %key, error = %e, "rollback could not remove blob");
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(key) = self.written.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(discard(self.content.clone(), self.digest.clone(), key));
            }
            Err(_) => warn!(key = %key, "upload abandoned outside a runtime, blob left behind"),
        }
    }
}
