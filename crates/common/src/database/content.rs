use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, FromRow, Row, Sqlite};

use crate::content::ContentEntry;
use crate::types::{from_db_size, from_millis, Digest};

macro_rules! content_columns {
    () => {
        "digest, storage_key, size, mime_type, reference_count, created_at, updated_at"
    };
}

impl FromRow<'_, SqliteRow> for ContentEntry {
    fn from_row(r: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(ContentEntry {
            digest: r.try_get("digest")?,
            storage_key: r.try_get("storage_key")?,
            size: from_db_size(r.try_get("size")?),
            mime_type: r.try_get("mime_type")?,
            reference_count: from_db_size(r.try_get("reference_count")?),
            created_at: from_millis(r.try_get("created_at")?),
            updated_at: from_millis(r.try_get("updated_at")?),
        })
    }
}

pub(crate) async fn get<'e, E>(exec: E, digest: &Digest) -> Result<Option<ContentEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "SELECT ",
        content_columns!(),
        " FROM content_entries WHERE digest = ?"
    ))
    .bind(digest)
    .fetch_optional(exec)
    .await
}

/// Insert with one reference, or fold into an existing row's count.
///
/// `None` when the existing row is at zero references: it is pending
/// reclamation and its blob may already be gone.
pub(crate) async fn register<'e, E>(
    exec: E,
    digest: &Digest,
    storage_key: &str,
    size: i64,
    mime_type: &str,
    now: i64,
) -> Result<Option<ContentEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "INSERT INTO content_entries \
         (digest, storage_key, size, mime_type, reference_count, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 1, ?, ?) \
         ON CONFLICT(digest) DO UPDATE SET \
             reference_count = reference_count + 1, \
             updated_at = excluded.updated_at \
         WHERE content_entries.reference_count > 0 \
         RETURNING ",
        content_columns!()
    ))
    .bind(digest)
    .bind(storage_key)
    .bind(size)
    .bind(mime_type)
    .bind(now)
    .bind(now)
    .fetch_optional(exec)
    .await
}

/// New count, or `None` if the entry is missing or pending reclamation.
pub(crate) async fn increment<'e, E>(exec: E, digest: &Digest, now: i64) -> Result<Option<i64>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        UPDATE content_entries
        SET reference_count = reference_count + 1, updated_at = ?
        WHERE digest = ? AND reference_count > 0
        RETURNING reference_count
        "#,
    )
    .bind(now)
    .bind(digest)
    .fetch_optional(exec)
    .await?;
    row.map(|r| r.try_get("reference_count")).transpose()
}

/// New count, or `None` if there was no reference to drop.
pub(crate) async fn decrement<'e, E>(exec: E, digest: &Digest, now: i64) -> Result<Option<i64>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        UPDATE content_entries
        SET reference_count = reference_count - 1, updated_at = ?
        WHERE digest = ? AND reference_count > 0
        RETURNING reference_count
        "#,
    )
    .bind(now)
    .bind(digest)
    .fetch_optional(exec)
    .await?;
    row.map(|r| r.try_get("reference_count")).transpose()
}

pub(crate) async fn delete_unreferenced<'e, E>(exec: E, digest: &Digest) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM content_entries WHERE digest = ? AND reference_count = 0")
        .bind(digest)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn unreferenced<'e, E>(exec: E) -> Result<Vec<ContentEntry>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as(concat!(
        "SELECT ",
        content_columns!(),
        " FROM content_entries WHERE reference_count = 0 ORDER BY updated_at"
    ))
    .fetch_all(exec)
    .await
}

pub(crate) async fn digests<'e, E>(exec: E) -> Result<Vec<Digest>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT digest FROM content_entries ORDER BY created_at")
        .fetch_all(exec)
        .await?;
    rows.iter().map(|r| r.try_get("digest")).collect()
}

pub(crate) async fn set_reference_count<'e, E>(
    exec: E,
    digest: &Digest,
    count: i64,
    now: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE content_entries SET reference_count = ?, updated_at = ? WHERE digest = ?",
    )
    .bind(count)
    .bind(now)
    .bind(digest)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}
