use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, FromRow, Row, Sqlite};

use crate::tree::{ListOptions, Node, NodeKind};
use crate::types::{from_db_size, from_millis, Digest, NodeId, OwnerId};

macro_rules! node_columns {
    () => {
        "id, owner_id, parent_id, name, kind, size, mime_type, digest, storage_key, \
         is_deleted, deleted_at, trash_root_id, created_at, updated_at"
    };
}

// Recursive walk over every node below (and including) ?1.
macro_rules! subtree_cte {
    () => {
        "WITH RECURSIVE subtree(id, depth) AS ( \
             SELECT id, 0 FROM nodes WHERE id = ?1 \
             UNION \
             SELECT n.id, s.depth + 1 FROM nodes n JOIN subtree s ON n.parent_id = s.id \
             WHERE s.depth < 65536 \
         ) "
    };
}

impl FromRow<'_, SqliteRow> for Node {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = r.try_get("kind")?;
        let kind = NodeKind::parse(&kind)
            .ok_or_else(|| sqlx::Error::Decode(format!("unknown node kind '{kind}'").into()))?;

        Ok(Node {
            id: r.try_get("id")?,
            owner: r.try_get("owner_id")?,
            parent: r.try_get("parent_id")?,
            name: r.try_get("name")?,
            kind,
            size: from_db_size(r.try_get("size")?),
            mime_type: r.try_get("mime_type")?,
            digest: r.try_get("digest")?,
            storage_key: r.try_get("storage_key")?,
            is_deleted: r.try_get::<i64, _>("is_deleted")? != 0,
            deleted_at: r.try_get::<Option<i64>, _>("deleted_at")?.map(from_millis),
            trash_root: r.try_get("trash_root_id")?,
            created_at: from_millis(r.try_get("created_at")?),
            updated_at: from_millis(r.try_get("updated_at")?),
        })
    }
}

/// Column values for a node about to be inserted.
#[derive(Debug, Clone)]
pub(crate) struct NewNode<'a> {
    pub owner: OwnerId,
    pub parent: Option<NodeId>,
    pub name: &'a str,
    pub kind: NodeKind,
    pub size: i64,
    pub mime_type: Option<&'a str>,
    pub digest: Option<&'a Digest>,
    pub storage_key: Option<&'a str>,
}

pub(crate) async fn insert<'e, E>(exec: E, node: &NewNode<'_>, now: i64) -> Result<Node, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "INSERT INTO nodes (owner_id, parent_id, name, kind, size, mime_type, digest, \
         storage_key, is_deleted, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?) RETURNING ",
        node_columns!()
    ))
    .bind(node.owner)
    .bind(node.parent)
    .bind(node.name)
    .bind(node.kind.as_str())
    .bind(node.size)
    .bind(node.mime_type)
    .bind(node.digest)
    .bind(node.storage_key)
    .bind(now)
    .bind(now)
    .fetch_one(exec)
    .await
}

/// Any node owned by `owner`, trashed or not.
pub(crate) async fn get<'e, E>(exec: E, owner: OwnerId, id: NodeId) -> Result<Option<Node>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "SELECT ",
        node_columns!(),
        " FROM nodes WHERE id = ? AND owner_id = ?"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(exec)
    .await
}

/// Lookup without an owner filter, for ancestor walks.
pub(crate) async fn get_any<'e, E>(exec: E, id: NodeId) -> Result<Option<Node>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!("SELECT ", node_columns!(), " FROM nodes WHERE id = ?"))
        .bind(id)
        .fetch_optional(exec)
        .await
}

/// Whether an active sibling named `name` exists, ignoring `exclude`.
pub(crate) async fn name_taken<'e, E>(
    exec: E,
    owner: OwnerId,
    parent: Option<NodeId>,
    name: &str,
    exclude: Option<NodeId>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT 1 FROM nodes
        WHERE owner_id = ?1 AND parent_id IS ?2 AND name = ?3 AND is_deleted = 0
          AND (?4 IS NULL OR id != ?4)
        LIMIT 1
        "#,
    )
    .bind(owner)
    .bind(parent)
    .bind(name)
    .bind(exclude)
    .fetch_optional(exec)
    .await?;
    Ok(row.is_some())
}

pub(crate) async fn rename<'e, E>(
    exec: E,
    owner: OwnerId,
    id: NodeId,
    name: &str,
    now: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE nodes SET name = ?, updated_at = ?
        WHERE id = ? AND owner_id = ? AND is_deleted = 0
        "#,
    )
    .bind(name)
    .bind(now)
    .bind(id)
    .bind(owner)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn set_parent<'e, E>(
    exec: E,
    owner: OwnerId,
    id: NodeId,
    parent: Option<NodeId>,
    now: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE nodes SET parent_id = ?, updated_at = ?
        WHERE id = ? AND owner_id = ? AND is_deleted = 0
        "#,
    )
    .bind(parent)
    .bind(now)
    .bind(id)
    .bind(owner)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn list_children<'e, E>(
    exec: E,
    owner: OwnerId,
    parent: Option<NodeId>,
    opts: &ListOptions,
) -> Result<Vec<Node>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    // sort column and direction come from closed enums
    let sql = format!(
        "SELECT {} FROM nodes \
         WHERE owner_id = ?1 AND parent_id IS ?2 AND is_deleted = 0 AND (?3 IS NULL OR kind = ?3) \
         ORDER BY {col} {dir}, id {dir} LIMIT ?4 OFFSET ?5",
        node_columns!(),
        col = opts.sort.column(),
        dir = opts.order.sql(),
    );
    sqlx::query_as(&sql)
        .bind(owner)
        .bind(parent)
        .bind(opts.kind.map(|k| k.as_str()))
        .bind(i64::try_from(opts.limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(opts.offset).unwrap_or(i64::MAX))
        .fetch_all(exec)
        .await
}

pub(crate) async fn count_children<'e, E>(
    exec: E,
    owner: OwnerId,
    parent: Option<NodeId>,
    kind: Option<NodeKind>,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total FROM nodes
        WHERE owner_id = ?1 AND parent_id IS ?2 AND is_deleted = 0 AND (?3 IS NULL OR kind = ?3)
        "#,
    )
    .bind(owner)
    .bind(parent)
    .bind(kind.map(|k| k.as_str()))
    .fetch_one(exec)
    .await?;
    row.try_get("total")
}

/// Every active child of `parent`, unpaged.
pub(crate) async fn active_children<'e, E>(
    exec: E,
    owner: OwnerId,
    parent: NodeId,
) -> Result<Vec<Node>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "SELECT ",
        node_columns!(),
        " FROM nodes WHERE owner_id = ? AND parent_id = ? AND is_deleted = 0 ORDER BY id"
    ))
    .bind(owner)
    .bind(parent)
    .fetch_all(exec)
    .await
}

pub(crate) async fn search<'e, E>(
    exec: E,
    owner: OwnerId,
    pattern: &str,
    kind: Option<NodeKind>,
    limit: i64,
) -> Result<Vec<Node>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "SELECT ",
        node_columns!(),
        " FROM nodes \
         WHERE owner_id = ?1 AND is_deleted = 0 AND instr(name, ?2) > 0 \
           AND (?3 IS NULL OR kind = ?3) \
         ORDER BY name, id LIMIT ?4"
    ))
    .bind(owner)
    .bind(pattern)
    .bind(kind.map(|k| k.as_str()))
    .bind(limit)
    .fetch_all(exec)
    .await
}

pub(crate) async fn active_folders<'e, E>(exec: E, owner: OwnerId) -> Result<Vec<Node>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "SELECT ",
        node_columns!(),
        " FROM nodes WHERE owner_id = ? AND kind = 'folder' AND is_deleted = 0 ORDER BY name, id"
    ))
    .bind(owner)
    .fetch_all(exec)
    .await
}

/// Total size of the active files at or below `root`.
pub(crate) async fn active_subtree_bytes<'e, E>(exec: E, root: NodeId) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(concat!(
        subtree_cte!(),
        "SELECT COALESCE(SUM(size), 0) AS bytes FROM nodes \
         WHERE id IN (SELECT id FROM subtree) AND kind = 'file' AND is_deleted = 0"
    ))
    .bind(root)
    .fetch_one(exec)
    .await?;
    row.try_get("bytes")
}

/// Soft-delete `root` and its active descendants in one statement.
pub(crate) async fn trash_subtree<'e, E>(exec: E, root: NodeId, now: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(concat!(
        subtree_cte!(),
        "UPDATE nodes SET is_deleted = 1, deleted_at = ?2, trash_root_id = ?1, updated_at = ?2 \
         WHERE id IN (SELECT id FROM subtree) AND is_deleted = 0"
    ))
    .bind(root)
    .bind(now)
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

/// Bytes of the files trashed together with `root`.
pub(crate) async fn trashed_group_bytes<'e, E>(exec: E, root: NodeId) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(size), 0) AS bytes FROM nodes
        WHERE trash_root_id = ? AND is_deleted = 1 AND kind = 'file'
        "#,
    )
    .bind(root)
    .fetch_one(exec)
    .await?;
    row.try_get("bytes")
}

/// Reactivate the trash root under `parent`.
pub(crate) async fn restore_root<'e, E>(
    exec: E,
    root: NodeId,
    parent: Option<NodeId>,
    now: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET is_deleted = 0, deleted_at = NULL, trash_root_id = NULL, parent_id = ?, updated_at = ?
        WHERE id = ? AND is_deleted = 1 AND trash_root_id = id
        "#,
    )
    .bind(parent)
    .bind(now)
    .bind(root)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Reactivate everything trashed along with `root`.
pub(crate) async fn restore_group<'e, E>(exec: E, root: NodeId, now: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET is_deleted = 0, deleted_at = NULL, trash_root_id = NULL, updated_at = ?
        WHERE trash_root_id = ? AND is_deleted = 1
        "#,
    )
    .bind(now)
    .bind(root)
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn trash_roots<'e, E>(exec: E, owner: OwnerId) -> Result<Vec<Node>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "SELECT ",
        node_columns!(),
        " FROM nodes WHERE owner_id = ? AND is_deleted = 1 AND trash_root_id = id \
         ORDER BY deleted_at DESC, id DESC"
    ))
    .bind(owner)
    .fetch_all(exec)
    .await
}

/// The subtree below `root` (inclusive), deepest nodes first.
pub(crate) async fn subtree_deepest_first<'e, E>(
    exec: E,
    root: NodeId,
) -> Result<Vec<Node>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        subtree_cte!(),
        "SELECT nodes.* FROM nodes JOIN subtree ON nodes.id = subtree.id \
         ORDER BY subtree.depth DESC, nodes.id DESC"
    ))
    .bind(root)
    .fetch_all(exec)
    .await
}

/// Remove a trashed node row for good.
pub(crate) async fn delete_trashed<'e, E>(exec: E, id: NodeId) -> Result<Option<Node>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "DELETE FROM nodes WHERE id = ? AND is_deleted = 1 RETURNING ",
        node_columns!()
    ))
    .bind(id)
    .fetch_optional(exec)
    .await
}

pub(crate) async fn storage_key_in_use<'e, E>(exec: E, key: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT 1 FROM nodes WHERE storage_key = ?
        UNION ALL
        SELECT 1 FROM content_entries WHERE storage_key = ?
        LIMIT 1
        "#,
    )
    .bind(key)
    .bind(key)
    .fetch_optional(exec)
    .await?;
    Ok(row.is_some())
}

pub(crate) async fn active_file_bytes<'e, E>(exec: E, owner: OwnerId) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(size), 0) AS bytes FROM nodes
        WHERE owner_id = ? AND kind = 'file' AND is_deleted = 0
        "#,
    )
    .bind(owner)
    .fetch_one(exec)
    .await?;
    row.try_get("bytes")
}

/// Nodes (any state, any owner) carrying `digest`.
pub(crate) async fn count_by_digest<'e, E>(exec: E, digest: &Digest) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT COUNT(*) AS total FROM nodes WHERE digest = ?")
        .bind(digest)
        .fetch_one(exec)
        .await?;
    row.try_get("total")
}

/// Levels below `root` in its subtree (0 for a leaf).
pub(crate) async fn subtree_height<'e, E>(exec: E, root: NodeId) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(concat!(
        subtree_cte!(),
        "SELECT COALESCE(MAX(depth), 0) AS height FROM subtree"
    ))
    .bind(root)
    .fetch_one(exec)
    .await?;
    row.try_get("height")
}
