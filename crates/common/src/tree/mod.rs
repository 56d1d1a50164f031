//! The per-owner hierarchy of folders and files.
//!
//! Nodes live in one table keyed by id with the parent stored as an optional
//! id. Name uniqueness among active siblings is enforced by a partial unique
//! index; the pre-checks here only produce friendlier errors. Every walk over
//! the hierarchy is iterative and bounded by [`TreeLimits`].

mod naming;
mod node;

use std::collections::{HashMap, HashSet, VecDeque};

use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::config::{TreeLimits, VaultConfig};
use crate::database::nodes::{self, NewNode};
use crate::database::{content, Database};
use crate::error::{Result, VaultError};
use crate::quota;
use crate::types::{now_millis, to_db_size, Digest, NodeId, OwnerId};

pub(crate) use naming::validate_name;
pub use node::{FolderTree, ListOptions, Listing, Node, NodeKind, SortKey, SortOrder};

#[derive(Debug, Clone)]
pub struct NodeTree {
    db: Database,
    limits: TreeLimits,
    copy_name_attempts: u32,
}

impl NodeTree {
    pub fn new(db: Database, config: &VaultConfig) -> Self {
        Self {
            db,
            limits: config.limits,
            copy_name_attempts: config.copy_name_attempts,
        }
    }

    pub fn limits(&self) -> TreeLimits {
        self.limits
    }

    /// An owned node, trashed or not.
    pub async fn get(&self, owner: OwnerId, id: NodeId) -> Result<Node> {
        nodes::get(self.db.pool(), owner, id)
            .await?
            .ok_or_else(|| VaultError::node_not_found(id))
    }

    /// An owned node that is not in the trash.
    pub async fn get_active(&self, owner: OwnerId, id: NodeId) -> Result<Node> {
        let mut conn = self.db.acquire().await?;
        active_node(&mut conn, owner, id).await
    }

    /// Record a file node. The caller already holds the content reference
    /// for `digest` and the quota for `size`.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_file(
        &self,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
        size: u64,
        mime_type: &str,
        digest: Option<&Digest>,
        storage_key: &str,
    ) -> Result<Node> {
        let new = NewNode {
            owner,
            parent,
            name,
            kind: NodeKind::File,
            size: to_db_size(size)?,
            mime_type: Some(mime_type),
            digest,
            storage_key: Some(storage_key),
        };
        self.create(new).await
    }

    pub async fn create_folder(
        &self,
        owner: OwnerId,
        parent: Option<NodeId>,
        name: &str,
    ) -> Result<Node> {
        let new = NewNode {
            owner,
            parent,
            name,
            kind: NodeKind::Folder,
            size: 0,
            mime_type: None,
            digest: None,
            storage_key: None,
        };
        self.create(new).await
    }

    async fn create(&self, new: NewNode<'_>) -> Result<Node> {
        let mut tx = self.db.begin_write().await?;
        let node = self.insert_in(&mut tx, &new).await?;
        tx.commit().await?;

        info!(
            owner = %node.owner,
            node = %node.id,
            kind = node.kind.as_str(),
            size = node.size,
            "node created"
        );
        Ok(node)
    }

    pub async fn rename(&self, owner: OwnerId, id: NodeId, new_name: &str) -> Result<Node> {
        validate_name(new_name)?;

        let mut tx = self.db.begin_write().await?;
        let node = active_node(&mut tx, owner, id).await?;
        if node.name == new_name {
            return Ok(node);
        }
        if nodes::name_taken(&mut *tx, owner, node.parent, new_name, Some(id)).await? {
            return Err(VaultError::NameConflict(new_name.to_string()));
        }
        nodes::rename(&mut *tx, owner, id, new_name, now_millis())
            .await
            .map_err(|e| insert_error(e, owner, new_name))?;
        let node = active_node(&mut tx, owner, id).await?;
        tx.commit().await?;

        debug!(owner = %owner, node = %id, "node renamed");
        Ok(node)
    }

    /// Re-parent `id` under `new_parent` (root level for `None`).
    ///
    /// Rejects moving a node into itself or one of its descendants, and
    /// applies the same sibling-name rule as creation.
    pub async fn move_node(
        &self,
        owner: OwnerId,
        id: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<Node> {
        let mut tx = self.db.begin_write().await?;
        let node = active_node(&mut tx, owner, id).await?;
        if node.parent == new_parent {
            return Ok(node);
        }

        if let Some(parent) = new_parent {
            let chain = self.parent_chain(&mut tx, owner, parent).await?;
            if chain.iter().any(|ancestor| ancestor.id == id) {
                return Err(VaultError::ParentInvalid(format!(
                    "cannot move node {id} into itself or a descendant"
                )));
            }
            let height = nodes::subtree_height(&mut *tx, id).await?;
            if chain.len() + usize::try_from(height).unwrap_or(usize::MAX) >= self.limits.max_depth {
                return Err(too_deep(self.limits.max_depth));
            }
        }

        if nodes::name_taken(&mut *tx, owner, new_parent, &node.name, Some(id)).await? {
            return Err(VaultError::NameConflict(node.name));
        }
        nodes::set_parent(&mut *tx, owner, id, new_parent, now_millis())
            .await
            .map_err(|e| insert_error(e, owner, &node.name))?;
        let node = active_node(&mut tx, owner, id).await?;
        tx.commit().await?;

        debug!(owner = %owner, node = %id, parent = ?new_parent, "node moved");
        Ok(node)
    }

    /// Duplicate `id` (and, for folders, its active subtree) under
    /// `new_parent`. File copies share the source's content and take a new
    /// reference on it; the owner is charged for every copied byte.
    pub async fn copy(
        &self,
        owner: OwnerId,
        id: NodeId,
        new_parent: Option<NodeId>,
    ) -> Result<Node> {
        let mut tx = self.db.begin_write().await?;
        let source = active_node(&mut tx, owner, id).await?;

        let dest_depth = match new_parent {
            Some(parent) => self.parent_chain(&mut tx, owner, parent).await?.len(),
            None => 0,
        };

        // Snapshot first, so copying a folder into its own subtree terminates
        let plan = self.snapshot(&mut tx, owner, source, dest_depth).await?;
        let bytes: u64 = plan
            .iter()
            .filter(|p| p.node.is_file())
            .map(|p| p.node.size)
            .sum();

        let root_name = self
            .free_name(&mut tx, owner, new_parent, &plan[0].node)
            .await?;
        quota::reserve_in(&mut tx, owner, bytes).await?;

        let now = now_millis();
        let mut created: Vec<NodeId> = Vec::with_capacity(plan.len());
        let mut root = None;
        for (index, planned) in plan.iter().enumerate() {
            let src = &planned.node;
            let parent = match planned.parent_index {
                None => new_parent,
                Some(i) => Some(created[i]),
            };
            let name = if index == 0 { root_name.as_str() } else { src.name.as_str() };
            let new = NewNode {
                owner,
                parent,
                name,
                kind: src.kind,
                size: to_db_size(src.size)?,
                mime_type: src.mime_type.as_deref(),
                digest: src.digest.as_ref(),
                storage_key: src.storage_key.as_deref(),
            };
            let node = nodes::insert(&mut *tx, &new, now)
                .await
                .map_err(|e| insert_error(e, owner, name))?;

            if let Some(digest) = &src.digest {
                if content::increment(&mut *tx, digest, now).await?.is_none() {
                    return Err(VaultError::inconsistent(format!(
                        "node {} references content {digest} with no live entry",
                        src.id
                    )));
                }
            }

            created.push(node.id);
            if index == 0 {
                root = Some(node);
            }
        }
        tx.commit().await?;

        let root = root.ok_or_else(|| VaultError::inconsistent("copy produced no root"))?;
        info!(
            owner = %owner,
            source = %id,
            copy = %root.id,
            nodes = created.len(),
            bytes = bytes,
            "subtree copied"
        );
        Ok(root)
    }

    /// Active children of `parent` (root level for `None`), one page at a time.
    pub async fn list_children(
        &self,
        owner: OwnerId,
        parent: Option<NodeId>,
        opts: &ListOptions,
    ) -> Result<Listing> {
        let mut conn = self.db.acquire().await?;
        if let Some(parent) = parent {
            let folder = active_node(&mut conn, owner, parent).await?;
            if !folder.is_folder() {
                return Err(VaultError::ParentInvalid(format!("node {parent} is not a folder")));
            }
        }

        let mut opts = *opts;
        if opts.limit == 0 {
            opts.limit = ListOptions::DEFAULT_LIMIT;
        }
        let nodes = nodes::list_children(&mut *conn, owner, parent, &opts).await?;
        let total = nodes::count_children(&mut *conn, owner, parent, opts.kind).await?;
        Ok(Listing {
            nodes,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    /// Case-sensitive substring match over the owner's active node names.
    pub async fn search(
        &self,
        owner: OwnerId,
        pattern: &str,
        kind: Option<NodeKind>,
    ) -> Result<Vec<Node>> {
        if pattern.is_empty() {
            return Err(VaultError::InvalidInput("search pattern must not be empty".into()));
        }
        let limit = i64::try_from(self.limits.max_nodes).unwrap_or(i64::MAX);
        Ok(nodes::search(self.db.pool(), owner, pattern, kind, limit).await?)
    }

    /// The owner's folder hierarchy, files excluded, children sorted by name.
    pub async fn build_tree(&self, owner: OwnerId) -> Result<Vec<FolderTree>> {
        let folders = nodes::active_folders(self.db.pool(), owner).await?;
        Ok(assemble_tree(&folders))
    }

    /// Ancestors of `id` from the root level down to `id` itself.
    pub async fn path(&self, owner: OwnerId, id: NodeId) -> Result<Vec<Node>> {
        let mut conn = self.db.acquire().await?;
        active_node(&mut conn, owner, id).await?;
        let mut chain = self.parent_chain(&mut conn, owner, id).await?;
        chain.reverse();
        Ok(chain)
    }

    /// Whether `target` is `ancestor` or sits below it.
    ///
    /// Walks upward from `target`; trashed nodes are outside every subtree.
    pub async fn is_within(&self, ancestor: NodeId, target: NodeId) -> Result<bool> {
        let mut conn = self.db.acquire().await?;
        let mut current = Some(target);
        let mut steps = 0usize;

        while let Some(id) = current {
            let Some(node) = nodes::get_any(&mut *conn, id).await? else {
                return Ok(false);
            };
            if node.is_deleted {
                return Ok(false);
            }
            if id == ancestor {
                return Ok(true);
            }
            steps += 1;
            if steps > self.limits.max_depth {
                return Err(VaultError::inconsistent(format!(
                    "ancestor chain of node {target} exceeds {} levels",
                    self.limits.max_depth
                )));
            }
            current = node.parent;
        }
        Ok(false)
    }

    /// Validate and insert one node on an open connection, leaving the
    /// commit to the caller.
    pub(crate) async fn insert_in(
        &self,
        conn: &mut SqliteConnection,
        new: &NewNode<'_>,
    ) -> Result<Node> {
        validate_name(new.name)?;
        if let Some(parent) = new.parent {
            let depth = self.parent_chain(&mut *conn, new.owner, parent).await?.len();
            if depth >= self.limits.max_depth {
                return Err(too_deep(self.limits.max_depth));
            }
        }
        if nodes::name_taken(&mut *conn, new.owner, new.parent, new.name, None).await? {
            return Err(VaultError::NameConflict(new.name.to_string()));
        }
        nodes::insert(&mut *conn, new, now_millis())
            .await
            .map_err(|e| insert_error(e, new.owner, new.name))
    }

    /// Active folder `parent` and all its ancestors, nearest first.
    ///
    /// Fails `ParentInvalid` unless `parent` is an active folder of `owner`.
    pub(crate) async fn parent_chain(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        parent: NodeId,
    ) -> Result<Vec<Node>> {
        let first = nodes::get(&mut *conn, owner, parent)
            .await?
            .filter(Node::is_active)
            .ok_or_else(|| VaultError::ParentInvalid(format!("folder {parent} does not exist")))?;
        if !first.is_folder() {
            return Err(VaultError::ParentInvalid(format!("node {parent} is not a folder")));
        }

        let mut chain = vec![first];
        while let Some(next) = chain.last().and_then(|n| n.parent) {
            if chain.len() > self.limits.max_depth {
                return Err(VaultError::inconsistent(format!(
                    "ancestor chain of node {parent} exceeds {} levels",
                    self.limits.max_depth
                )));
            }
            let node = nodes::get(&mut *conn, owner, next).await?.ok_or_else(|| {
                VaultError::inconsistent(format!("node {next} missing from the chain of {parent}"))
            })?;
            chain.push(node);
        }
        Ok(chain)
    }

    /// Breadth-first snapshot of the active subtree under `source`.
    async fn snapshot(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        source: Node,
        dest_depth: usize,
    ) -> Result<Vec<Planned>> {
        let mut plan = vec![Planned {
            node: source,
            parent_index: None,
            depth: 0,
        }];
        let mut queue = VecDeque::from([0usize]);

        while let Some(index) = queue.pop_front() {
            if dest_depth + plan[index].depth >= self.limits.max_depth {
                return Err(too_deep(self.limits.max_depth));
            }
            if !plan[index].node.is_folder() {
                continue;
            }
            let children = nodes::active_children(&mut *conn, owner, plan[index].node.id).await?;
            let depth = plan[index].depth + 1;
            for child in children {
                if plan.len() >= self.limits.max_nodes {
                    return Err(VaultError::InvalidInput(format!(
                        "subtree has more than {} nodes",
                        self.limits.max_nodes
                    )));
                }
                queue.push_back(plan.len());
                plan.push(Planned {
                    node: child,
                    parent_index: Some(index),
                    depth,
                });
            }
        }
        Ok(plan)
    }

    /// `node.name` if free under `parent`, else the first free numbered variant.
    async fn free_name(
        &self,
        conn: &mut SqliteConnection,
        owner: OwnerId,
        parent: Option<NodeId>,
        node: &Node,
    ) -> Result<String> {
        if !nodes::name_taken(&mut *conn, owner, parent, &node.name, None).await? {
            return Ok(node.name.clone());
        }
        for n in 1..=self.copy_name_attempts {
            let candidate = naming::numbered(&node.name, node.kind, n);
            if !nodes::name_taken(&mut *conn, owner, parent, &candidate, None).await? {
                return Ok(candidate);
            }
        }
        Err(VaultError::NameConflict(node.name.clone()))
    }
}

struct Planned {
    node: Node,
    parent_index: Option<usize>,
    depth: usize,
}

pub(crate) async fn active_node(
    conn: &mut SqliteConnection,
    owner: OwnerId,
    id: NodeId,
) -> Result<Node> {
    nodes::get(&mut *conn, owner, id)
        .await?
        .filter(Node::is_active)
        .ok_or_else(|| VaultError::node_not_found(id))
}

fn too_deep(max_depth: usize) -> VaultError {
    VaultError::InvalidInput(format!("folders may be nested at most {max_depth} levels"))
}

/// Map insert/update failures: unique index hits are name conflicts and a
/// dangling owner is a missing account.
pub(crate) fn insert_error(err: sqlx::Error, owner: OwnerId, name: &str) -> VaultError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            VaultError::NameConflict(name.to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            VaultError::NotFound(format!("account {owner}"))
        }
        _ => VaultError::Database(err),
    }
}

/// Nest folders under their parents without recursion.
fn assemble_tree(folders: &[Node]) -> Vec<FolderTree> {
    let present: HashSet<NodeId> = folders.iter().map(|f| f.id).collect();
    let mut children: HashMap<NodeId, Vec<&Node>> = HashMap::new();
    let mut roots: Vec<&Node> = Vec::new();
    for folder in folders {
        match folder.parent {
            Some(parent) if present.contains(&parent) => {
                children.entry(parent).or_default().push(folder)
            }
            _ => roots.push(folder),
        }
    }

    // pre-order, then build in reverse so children exist before parents
    let mut order: Vec<&Node> = Vec::with_capacity(folders.len());
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<&Node> = roots.iter().rev().copied().collect();
    while let Some(folder) = stack.pop() {
        if !seen.insert(folder.id) {
            continue;
        }
        order.push(folder);
        if let Some(kids) = children.get(&folder.id) {
            stack.extend(kids.iter().rev().copied());
        }
    }

    let mut built: HashMap<NodeId, FolderTree> = HashMap::new();
    for folder in order.iter().rev() {
        let kids = children
            .get(&folder.id)
            .map(|kids| kids.iter().filter_map(|k| built.remove(&k.id)).collect())
            .unwrap_or_default();
        built.insert(
            folder.id,
            FolderTree {
                id: folder.id,
                name: folder.name.clone(),
                children: kids,
            },
        );
    }

    roots.iter().filter_map(|r| built.remove(&r.id)).collect()
}
