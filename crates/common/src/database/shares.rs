use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, FromRow, Row, Sqlite};

use crate::share::{Share, ShareKind};
use crate::types::{from_db_size, from_millis, NodeId, OwnerId, ShareId};

macro_rules! share_columns {
    () => {
        "id, code, owner_id, node_id, kind, expires_at, password_hash, access_count, \
         max_access_count, created_at, updated_at"
    };
}

impl FromRow<'_, SqliteRow> for Share {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = r.try_get("kind")?;
        let kind = ShareKind::parse(&kind)
            .ok_or_else(|| sqlx::Error::Decode(format!("unknown share kind '{kind}'").into()))?;

        Ok(Share {
            id: r.try_get("id")?,
            code: r.try_get("code")?,
            owner: r.try_get("owner_id")?,
            node: r.try_get("node_id")?,
            kind,
            expires_at: r.try_get::<Option<i64>, _>("expires_at")?.map(from_millis),
            password_hash: r.try_get("password_hash")?,
            access_count: from_db_size(r.try_get("access_count")?),
            max_access_count: r
                .try_get::<Option<i64>, _>("max_access_count")?
                .map(from_db_size),
            created_at: from_millis(r.try_get("created_at")?),
            updated_at: from_millis(r.try_get("updated_at")?),
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NewShare<'a> {
    pub code: &'a str,
    pub owner: OwnerId,
    pub node: NodeId,
    pub kind: ShareKind,
    pub expires_at: Option<i64>,
    pub password_hash: Option<&'a str>,
    pub max_access_count: Option<i64>,
}

pub(crate) async fn insert<'e, E>(exec: E, share: &NewShare<'_>, now: i64) -> Result<Share, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "INSERT INTO shares (code, owner_id, node_id, kind, expires_at, password_hash, \
         access_count, max_access_count, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?) RETURNING ",
        share_columns!()
    ))
    .bind(share.code)
    .bind(share.owner)
    .bind(share.node)
    .bind(share.kind.as_str())
    .bind(share.expires_at)
    .bind(share.password_hash)
    .bind(share.max_access_count)
    .bind(now)
    .bind(now)
    .fetch_one(exec)
    .await
}

pub(crate) async fn get_by_code<'e, E>(exec: E, code: &str) -> Result<Option<Share>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!("SELECT ", share_columns!(), " FROM shares WHERE code = ?"))
        .bind(code)
        .fetch_optional(exec)
        .await
}

pub(crate) async fn get<'e, E>(exec: E, owner: OwnerId, id: ShareId) -> Result<Option<Share>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "SELECT ",
        share_columns!(),
        " FROM shares WHERE id = ? AND owner_id = ?"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(exec)
    .await
}

pub(crate) async fn list<'e, E>(exec: E, owner: OwnerId) -> Result<Vec<Share>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "SELECT ",
        share_columns!(),
        " FROM shares WHERE owner_id = ? ORDER BY created_at DESC, id DESC"
    ))
    .bind(owner)
    .fetch_all(exec)
    .await
}

pub(crate) async fn delete<'e, E>(exec: E, owner: OwnerId, id: ShareId) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM shares WHERE id = ? AND owner_id = ?")
        .bind(id)
        .bind(owner)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Count one access if the share is still within expiry and limit.
pub(crate) async fn consume<'e, E>(exec: E, code: &str, now: i64) -> Result<Option<Share>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "UPDATE shares SET access_count = access_count + 1, updated_at = ?1 \
         WHERE code = ?2 \
           AND (max_access_count IS NULL OR access_count < max_access_count) \
           AND (expires_at IS NULL OR expires_at > ?1) \
         RETURNING ",
        share_columns!()
    ))
    .bind(now)
    .bind(code)
    .fetch_optional(exec)
    .await
}
