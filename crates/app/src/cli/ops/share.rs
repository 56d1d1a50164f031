use std::path::PathBuf;

use chrono::{TimeDelta, Utc};
use clap::{Args, Subcommand};

use common::share::{Share as ShareLink, ShareKind, ShareOptions};
use common::types::{NodeId, ShareId};

use crate::cli::op::{CommandError, Op, OpContext};
use crate::cli::ops::files::write_download;
use crate::cli::ops::format_node;
use crate::cli::ops::listing::{format_listing, ListArgs};

fn describe(share: &ShareLink) -> String {
    let expiry = share
        .expires_at
        .map(|at| format!("expires {}", at.to_rfc3339()))
        .unwrap_or_else(|| "never expires".to_string());
    let accesses = match share.max_access_count {
        Some(max) => format!("{}/{} accesses", share.access_count, max),
        None => format!("{} accesses", share.access_count),
    };
    let lock = if share.has_password() { ", password" } else { "" };
    format!(
        "{:>6}  {}  node {}  {}, {}, {}{}",
        share.id,
        share.code,
        share.node,
        share.kind.as_str(),
        expiry,
        accesses,
        lock
    )
}

/// Password for reading a share, from the flag or the environment.
#[derive(Args, Debug, Clone)]
pub struct SharePassword {
    #[arg(long, env = "FILEVAULT_SHARE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl SharePassword {
    fn get(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

/// Create a share link for a file or folder.
#[derive(Args, Debug, Clone)]
pub struct Create {
    pub id: NodeId,

    /// Expiring link (default lifetime unless --expires-in is given)
    #[arg(long)]
    pub temporary: bool,

    /// Seconds until the link expires; implies --temporary
    #[arg(long)]
    pub expires_in: Option<i64>,

    /// Require this password to open the link
    #[arg(long)]
    pub password: Option<String>,

    /// Stop serving after this many reads (0 means unlimited)
    #[arg(long)]
    pub max_access: Option<u64>,
}

impl Create {
    fn options(&self) -> Result<ShareOptions, CommandError> {
        let temporary = self.temporary || self.expires_in.is_some();
        let expires_at = self
            .expires_in
            .map(|secs| {
                TimeDelta::try_seconds(secs)
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .ok_or_else(|| {
                        CommandError::Usage(format!("--expires-in {secs} is out of range"))
                    })
            })
            .transpose()?;
        Ok(ShareOptions {
            kind: if temporary {
                ShareKind::Temporary
            } else {
                ShareKind::Permanent
            },
            expires_at,
            password: self.password.clone(),
            max_access_count: self.max_access,
        })
    }
}

#[async_trait::async_trait]
impl Op for Create {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let options = self.options()?;
        let share = ctx
            .with_vault(|vault| async move {
                vault.shares().create(ctx.owner, self.id, &options).await
            })
            .await?;
        ctx.render(&share, describe)
    }
}

#[derive(Args, Debug, Clone)]
pub struct List;

#[async_trait::async_trait]
impl Op for List {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let shares = ctx
            .with_vault(|vault| async move {
                vault.shares().list(ctx.owner).await
            })
            .await?;
        ctx.render(&shares, |shares| {
            if shares.is_empty() {
                return "no shares".to_string();
            }
            shares.iter().map(describe).collect::<Vec<_>>().join("\n")
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct Revoke {
    pub id: ShareId,
}

#[async_trait::async_trait]
impl Op for Revoke {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        ctx.with_vault(|vault| async move { vault.shares().revoke(ctx.owner, self.id).await })
            .await?;
        Ok(format!("share {} revoked", self.id))
    }
}

/// Resolve a share code the way an anonymous visitor would.
#[derive(Args, Debug, Clone)]
pub struct Open {
    pub code: String,

    #[command(flatten)]
    pub password: SharePassword,
}

#[async_trait::async_trait]
impl Op for Open {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let view = ctx
            .with_vault(|vault| async move {
                vault
                    .open_share(&self.code, self.password.get())
                    .await
                    .map_err(public)
            })
            .await?;
        ctx.render(&view.node, format_node)
    }
}

/// List a folder inside a shared folder.
#[derive(Args, Debug, Clone)]
pub struct ListFolder {
    pub code: String,

    /// Folder inside the share (default: the shared folder itself)
    #[arg(long)]
    pub folder: Option<NodeId>,

    #[command(flatten)]
    pub password: SharePassword,

    #[command(flatten)]
    pub list: ListArgs,
}

#[async_trait::async_trait]
impl Op for ListFolder {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let listing = ctx
            .with_vault(|vault| async move {
                vault
                    .list_shared_folder(
                        &self.code,
                        self.password.get(),
                        self.folder,
                        &self.list.options(),
                    )
                    .await
                    .map_err(public)
            })
            .await?;
        ctx.render(&listing, |l| format_listing(l, self.list.offset))
    }
}

/// Download a file through a share link.
#[derive(Args, Debug, Clone)]
pub struct Get {
    pub code: String,

    /// File inside the share; the shared node itself for a file share
    pub file: NodeId,

    #[arg(long, short, conflicts_with = "presign")]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub presign: bool,

    #[command(flatten)]
    pub password: SharePassword,
}

impl Get {
    async fn fetch(&self, vault: &common::vault::Vault) -> Result<String, CommandError> {
        let password = self.password.get();
        let file = self.file;
        if self.presign {
            let url = vault.presign_shared(&self.code, password, file).await?;
            return Ok(url.to_string());
        }
        let (node, data) = vault.download_shared(&self.code, password, file).await?;
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&node.name));
        write_download(&output, &data).await
    }
}

#[async_trait::async_trait]
impl Op for Get {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        ctx.with_vault(|vault| async move {
            self.fetch(&vault).await.map_err(|e| match e {
                CommandError::Vault(e) => public(e),
                other => other,
            })
        })
        .await
    }
}

/// Share readers only ever see the sanitized message.
fn public(err: common::error::VaultError) -> CommandError {
    tracing::debug!(error = %err, kind = %err.kind(), "share read refused");
    CommandError::Usage(err.public_message())
}

crate::command_enum! {
    (Create, Create),
    (Ls, List),
    (Revoke, Revoke),
    (Open, Open),
    (LsFolder, ListFolder),
    (Get, Get),
}

pub type ShareCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Share {
    #[command(subcommand)]
    pub command: ShareCommand,
}

#[async_trait::async_trait]
impl Op for Share {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
