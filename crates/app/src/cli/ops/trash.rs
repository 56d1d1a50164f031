use clap::{Args, Subcommand};
use serde::Serialize;

use common::content::{ReclaimReport, RecountReport};
use common::trash::PurgeReport;
use common::types::NodeId;

use crate::cli::op::{CommandError, Op, OpContext};
use crate::cli::ops::{format_node, format_nodes};

fn describe_purge(report: &PurgeReport) -> String {
    format!(
        "deleted {} node(s), reclaimed {} blob(s)",
        report.nodes, report.blobs_reclaimed
    )
}

/// Trashed items, one line per directly trashed node.
#[derive(Args, Debug, Clone)]
pub struct List;

#[async_trait::async_trait]
impl Op for List {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let items = ctx
            .with_vault(|vault| async move {
                vault.trash().list(ctx.owner).await
            })
            .await?;
        ctx.render(&items, |items| format_nodes(items, "trash is empty"))
    }
}

#[derive(Args, Debug, Clone)]
pub struct Restore {
    pub id: NodeId,
}

#[async_trait::async_trait]
impl Op for Restore {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let node = ctx
            .with_vault(|vault| async move {
                vault.trash().restore(ctx.owner, self.id).await
            })
            .await?;
        ctx.render(&node, format_node)
    }
}

/// Permanently delete one trashed item.
#[derive(Args, Debug, Clone)]
pub struct Purge {
    pub id: NodeId,
}

#[async_trait::async_trait]
impl Op for Purge {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let report = ctx
            .with_vault(|vault| async move { vault.trash().purge(ctx.owner, self.id).await })
            .await?;
        ctx.render(&report, describe_purge)
    }
}

/// Permanently delete everything in the trash.
#[derive(Args, Debug, Clone)]
pub struct Empty;

#[async_trait::async_trait]
impl Op for Empty {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let report = ctx
            .with_vault(|vault| async move { vault.trash().empty(ctx.owner).await })
            .await?;
        ctx.render(&report, describe_purge)
    }
}

/// Retry removal of blobs whose last reference is gone.
#[derive(Args, Debug, Clone)]
pub struct Reclaim {
    /// First verify every reference count against the node table
    #[arg(long)]
    pub recount: bool,
}

#[derive(Serialize)]
struct ReclaimOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    recount: Option<RecountReport>,
    reclaim: ReclaimReport,
}

#[async_trait::async_trait]
impl Op for Reclaim {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let output = ctx
            .with_vault(|vault| async move {
                let recount = if self.recount {
                    Some(vault.content().recount().await?)
                } else {
                    None
                };
                let reclaim = vault.content().reclaim_orphans().await?;
                Ok::<_, CommandError>(ReclaimOutput { recount, reclaim })
            })
            .await?;
        ctx.render(&output, |out| {
            let mut lines = Vec::new();
            if let Some(r) = &out.recount {
                lines.push(format!(
                    "checked {} content entries, corrected {}, reclaimed {}",
                    r.checked, r.corrected, r.reclaimed
                ));
            }
            lines.push(format!(
                "reclaimed {} blob(s), {} still failing",
                out.reclaim.reclaimed, out.reclaim.failed
            ));
            lines.join("\n")
        })
    }
}

crate::command_enum! {
    (Ls, List),
    (Restore, Restore),
    (Purge, Purge),
    (Empty, Empty),
    (Reclaim, Reclaim),
}

pub type TrashCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Trash {
    #[command(subcommand)]
    pub command: TrashCommand,
}

#[async_trait::async_trait]
impl Op for Trash {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}
