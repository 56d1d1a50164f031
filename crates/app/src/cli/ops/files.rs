use std::path::PathBuf;

use bytes::Bytes;
use clap::Args;

use common::types::{Digest, NodeId};

use crate::cli::op::{CommandError, Op, OpContext};
use crate::cli::ops::{format_node, format_size};

/// Upload a local file.
#[derive(Args, Debug, Clone)]
pub struct Put {
    /// Local file to upload
    pub path: PathBuf,

    /// Destination folder id (default: root level)
    #[arg(long)]
    pub parent: Option<NodeId>,

    /// Name in the vault (default: the local file name)
    #[arg(long)]
    pub name: Option<String>,

    /// MIME type (default: guessed from the name)
    #[arg(long)]
    pub mime: Option<String>,
}

#[async_trait::async_trait]
impl Op for Put {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    CommandError::Usage(format!("cannot take a name from {}", self.path.display()))
                })?,
        };
        let data = Bytes::from(tokio::fs::read(&self.path).await?);

        let node = ctx
            .with_vault(|vault| async move {
                vault
                    .upload(ctx.owner, self.parent, &name, self.mime.as_deref(), data)
                    .await
            })
            .await?;

        ctx.render(&node, |node| {
            format!(
                "uploaded {} ({}) as node {}",
                node.name,
                format_size(node.size),
                node.id
            )
        })
    }
}

/// Create a file from content the vault already holds.
#[derive(Args, Debug, Clone)]
pub struct Link {
    /// SHA-256 of the contents, lowercase hex
    pub digest: Digest,

    /// Size of the contents in bytes
    pub size: u64,

    pub name: String,

    #[arg(long)]
    pub parent: Option<NodeId>,
}

#[async_trait::async_trait]
impl Op for Link {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx
            .with_vault(|vault| async move {
                vault
                    .quick_upload(ctx.owner, self.parent, &self.name, &self.digest, self.size)
                    .await
            })
            .await?;
        ctx.render(&node, format_node)
    }
}

#[derive(Args, Debug, Clone)]
pub struct Mkdir {
    pub name: String,

    /// Parent folder id (default: root level)
    #[arg(long)]
    pub parent: Option<NodeId>,
}

#[async_trait::async_trait]
impl Op for Mkdir {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx
            .with_vault(|vault| async move {
                vault
                    .tree()
                    .create_folder(ctx.owner, self.parent, &self.name)
                    .await
            })
            .await?;
        ctx.render(&node, format_node)
    }
}

#[derive(Args, Debug, Clone)]
pub struct Rename {
    pub id: NodeId,
    pub name: String,
}

#[async_trait::async_trait]
impl Op for Rename {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx
            .with_vault(|vault| async move {
                vault.tree().rename(ctx.owner, self.id, &self.name).await
            })
            .await?;
        ctx.render(&node, format_node)
    }
}

#[derive(Args, Debug, Clone)]
pub struct Mv {
    pub id: NodeId,

    /// Destination folder id; omit to move to the root level
    #[arg(long)]
    pub to: Option<NodeId>,
}

#[async_trait::async_trait]
impl Op for Mv {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx
            .with_vault(|vault| async move {
                vault.tree().move_node(ctx.owner, self.id, self.to).await
            })
            .await?;
        ctx.render(&node, format_node)
    }
}

#[derive(Args, Debug, Clone)]
pub struct Cp {
    pub id: NodeId,

    /// Destination folder id; omit to copy to the root level
    #[arg(long)]
    pub to: Option<NodeId>,
}

#[async_trait::async_trait]
impl Op for Cp {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx
            .with_vault(|vault| async move {
                vault.tree().copy(ctx.owner, self.id, self.to).await
            })
            .await?;
        ctx.render(&node, format_node)
    }
}

/// Download a file, or print a time-limited URL for it.
#[derive(Args, Debug, Clone)]
pub struct Get {
    pub id: NodeId,

    /// Where to write the contents (default: the file's name)
    #[arg(long, short, conflicts_with = "presign")]
    pub output: Option<PathBuf>,

    /// Print a presigned URL instead of downloading
    #[arg(long)]
    pub presign: bool,
}

#[async_trait::async_trait]
impl Op for Get {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        if self.presign {
            let url = ctx
                .with_vault(|vault| async move { vault.presign(ctx.owner, self.id).await })
                .await?;
            return Ok(url.to_string());
        }

        let (node, data) = ctx
            .with_vault(|vault| async move { vault.download(ctx.owner, self.id).await })
            .await?;
        let output = self.output.clone().unwrap_or_else(|| PathBuf::from(&node.name));
        write_download(&output, &data).await
    }
}

pub(crate) async fn write_download(path: &std::path::Path, data: &Bytes) -> Result<String, CommandError> {
    tokio::fs::write(path, data).await?;
    Ok(format!(
        "wrote {} to {}",
        format_size(data.len() as u64),
        path.display()
    ))
}

/// Move a node and everything below it to the trash.
#[derive(Args, Debug, Clone)]
pub struct Rm {
    pub id: NodeId,
}

#[async_trait::async_trait]
impl Op for Rm {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx
            .with_vault(|vault| async move {
                vault.trash().trash(ctx.owner, self.id).await
            })
            .await?;
        ctx.render(&node, |node| format!("moved {} to trash", node.name))
    }
}
