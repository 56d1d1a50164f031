use sqlx::{Executor, Row, Sqlite};

use crate::quota::Usage;
use crate::types::{from_db_size, OwnerId};

/// Create the account row; `false` if it already existed.
pub(crate) async fn insert_if_missing<'e, E>(
    exec: E,
    owner: OwnerId,
    quota: i64,
    now: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO users (id, total_quota, total_used, created_at, updated_at)
        VALUES (?, ?, 0, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(owner)
    .bind(quota)
    .bind(now)
    .bind(now)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn usage<'e, E>(exec: E, owner: OwnerId) -> Result<Option<Usage>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT total_quota, total_used FROM users WHERE id = ?")
        .bind(owner)
        .fetch_optional(exec)
        .await?;

    row.map(|r| {
        Ok::<_, sqlx::Error>(Usage {
            total_quota: from_db_size(r.try_get("total_quota")?),
            total_used: from_db_size(r.try_get("total_used")?),
        })
    })
    .transpose()
}

/// Add `bytes` to the owner's usage only if it stays within quota.
pub(crate) async fn reserve<'e, E>(exec: E, owner: OwnerId, bytes: i64, now: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE users SET total_used = total_used + ?1, updated_at = ?2
        WHERE id = ?3 AND total_used + ?1 <= total_quota
        "#,
    )
    .bind(bytes)
    .bind(now)
    .bind(owner)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Subtract `bytes`; `false` if usage would go negative.
pub(crate) async fn release<'e, E>(exec: E, owner: OwnerId, bytes: i64, now: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE users SET total_used = total_used - ?1, updated_at = ?2
        WHERE id = ?3 AND total_used >= ?1
        "#,
    )
    .bind(bytes)
    .bind(now)
    .bind(owner)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn set_used<'e, E>(exec: E, owner: OwnerId, used: i64, now: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE users SET total_used = ?, updated_at = ? WHERE id = ?")
        .bind(used)
        .bind(now)
        .bind(owner)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn set_quota<'e, E>(exec: E, owner: OwnerId, quota: i64, now: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE users SET total_quota = ?, updated_at = ? WHERE id = ?")
        .bind(quota)
        .bind(now)
        .bind(owner)
        .execute(exec)
        .await?;
    Ok(result.rows_affected() == 1)
}
