use std::path::PathBuf;

use clap::Args;

use common::config::VaultConfig;
use common::database::Database;
use common::error::VaultError;
use common::object_store::ObjectStoreConfig;
use common::quota::QuotaLedger;

use crate::cli::ops::format_size;
use crate::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Directory for file contents (default: <state dir>/blobs)
    #[arg(long, conflicts_with = "s3_endpoint")]
    pub blobs_path: Option<PathBuf>,

    /// S3-compatible endpoint; stores contents in a bucket instead of on disk
    #[arg(long, requires_all = ["s3_bucket", "s3_access_key", "s3_secret_key"])]
    pub s3_endpoint: Option<String>,

    #[arg(long)]
    pub s3_bucket: Option<String>,

    #[arg(long, env = "FILEVAULT_S3_ACCESS_KEY", hide_env_values = true)]
    pub s3_access_key: Option<String>,

    #[arg(long, env = "FILEVAULT_S3_SECRET_KEY", hide_env_values = true)]
    pub s3_secret_key: Option<String>,

    #[arg(long)]
    pub s3_region: Option<String>,

    /// Quota in bytes granted to new accounts
    #[arg(long)]
    pub default_quota: Option<u64>,

    /// Default log level (overridden by RUST_LOG)
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Also write logs to daily files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),

    #[error("init failed: {0}")]
    Vault(#[from] VaultError),
}

impl Init {
    fn blob_store(&self, vault_dir: &std::path::Path) -> ObjectStoreConfig {
        match (&self.s3_endpoint, &self.s3_bucket, &self.s3_access_key, &self.s3_secret_key) {
            (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) => {
                ObjectStoreConfig::S3 {
                    endpoint: endpoint.clone(),
                    access_key: access_key.clone(),
                    secret_key: secret_key.clone(),
                    bucket: bucket.clone(),
                    region: self.s3_region.clone(),
                }
            }
            _ => ObjectStoreConfig::Local {
                path: self
                    .blobs_path
                    .clone()
                    .unwrap_or_else(|| AppState::local_blobs_path(vault_dir)),
            },
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let vault_dir = AppState::vault_dir(ctx.config_path.clone())?;
        let mut vault = VaultConfig::default();
        if let Some(quota) = self.default_quota {
            vault.default_quota = quota;
        }
        let config = AppConfig {
            blob_store: self.blob_store(&vault_dir),
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
            vault,
        };

        let state = AppState::init(Some(vault_dir), Some(config))?;

        // creates the schema and the acting owner's account
        let db = Database::connect(&state.db_path).await?;
        let usage = QuotaLedger::new(db.clone(), &state.config.vault)
            .open_account(ctx.owner, None)
            .await?;
        db.close().await;

        let blobs = match &state.config.blob_store {
            ObjectStoreConfig::Memory => "memory".to_string(),
            ObjectStoreConfig::Local { path } => path.display().to_string(),
            ObjectStoreConfig::S3 {
                endpoint, bucket, ..
            } => format!("s3 {}/{}", endpoint, bucket),
        };

        let output = format!(
            "Initialized filevault directory at: {}\n\
             - Database: {}\n\
             - Config: {}\n\
             - Blobs: {}\n\
             - Account {}: {} quota",
            state.vault_dir.display(),
            state.db_path.display(),
            state.config_path.display(),
            blobs,
            ctx.owner,
            format_size(usage.total_quota),
        );

        Ok(output)
    }
}
