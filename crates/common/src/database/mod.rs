//! SQLite persistence for nodes, content entries, quotas and shares.
//!
//! Query functions are generic over the executor so that a component can run
//! them either straight on the pool or inside an open transaction.

pub(crate) mod content;
pub(crate) mod nodes;
pub(crate) mod shares;
pub(crate) mod users;

use std::ops::Deref;
use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use crate::error::Result;

/// Handle to the metadata database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database(SqlitePool);

impl Database {
    /// Open (creating if needed) a database file and run migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(sqlx::Error::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self(pool);
        db.migrate().await?;
        tracing::info!(path = %path.display(), "database ready");
        Ok(db)
    }

    /// A private in-memory database.
    ///
    /// Every pooled connection to `:memory:` would be its own database, so the
    /// pool is pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self(pool);
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.0).await?;
        Ok(())
    }

    /// A transaction that takes the write lock up front.
    ///
    /// A deferred `BEGIN` that reads before writing cannot upgrade once
    /// another connection has committed, and SQLite fails it with
    /// `SQLITE_BUSY` without consulting the busy timeout. Every unit of work
    /// that writes starts here instead, so it waits its turn.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.0.begin_with("BEGIN IMMEDIATE").await?)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.0
    }

    pub async fn close(&self) {
        self.0.close().await;
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
