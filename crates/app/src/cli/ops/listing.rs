use clap::Args;
use serde::Serialize;

use common::tree::{FolderTree, ListOptions, Node, NodeKind, SortKey, SortOrder};
use common::types::NodeId;

use crate::cli::op::{CommandError, Op, OpContext};
use crate::cli::ops::{format_node, format_nodes};

/// Paging and ordering flags shared by folder listings.
#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only folders or only files
    #[arg(long)]
    pub kind: Option<NodeKind>,

    /// name, size or updated_at
    #[arg(long, default_value = "name")]
    pub sort: SortKey,

    /// asc or desc
    #[arg(long, default_value = "asc")]
    pub order: SortOrder,

    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    #[arg(long, default_value_t = ListOptions::DEFAULT_LIMIT)]
    pub limit: u64,
}

impl ListArgs {
    pub fn options(&self) -> ListOptions {
        ListOptions {
            kind: self.kind,
            sort: self.sort,
            order: self.order,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

pub(crate) fn format_listing(listing: &common::tree::Listing, offset: u64) -> String {
    let body = format_nodes(&listing.nodes, "(empty)");
    let shown = listing.nodes.len() as u64;
    if offset + shown < listing.total || offset > 0 {
        format!(
            "{}\n-- {}-{} of {}",
            body,
            offset + 1,
            offset + shown,
            listing.total
        )
    } else {
        body
    }
}

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Folder id (default: root level)
    pub folder: Option<NodeId>,

    #[command(flatten)]
    pub list: ListArgs,
}

#[async_trait::async_trait]
impl Op for Ls {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let listing = ctx
            .with_vault(|vault| async move {
                vault
                    .tree()
                    .list_children(ctx.owner, self.folder, &self.list.options())
                    .await
            })
            .await?;
        ctx.render(&listing, |l| format_listing(l, self.list.offset))
    }
}

/// Print the folder hierarchy.
#[derive(Args, Debug, Clone)]
pub struct Tree;

fn draw(trees: &[FolderTree], prefix: &str, out: &mut Vec<String>) {
    for (i, tree) in trees.iter().enumerate() {
        let last = i + 1 == trees.len();
        let branch = if last { "└── " } else { "├── " };
        out.push(format!("{}{}{}/ ({})", prefix, branch, tree.name, tree.id));
        let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
        draw(&tree.children, &child_prefix, out);
    }
}

#[async_trait::async_trait]
impl Op for Tree {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let trees = ctx
            .with_vault(|vault| async move {
                vault.tree().build_tree(ctx.owner).await
            })
            .await?;
        ctx.render(&trees, |trees| {
            let mut lines = vec![".".to_string()];
            draw(trees, "", &mut lines);
            lines.join("\n")
        })
    }
}

/// Search active names by substring.
#[derive(Args, Debug, Clone)]
pub struct Find {
    pub pattern: String,

    #[arg(long)]
    pub kind: Option<NodeKind>,
}

#[async_trait::async_trait]
impl Op for Find {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let found = ctx
            .with_vault(|vault| async move {
                vault
                    .tree()
                    .search(ctx.owner, &self.pattern, self.kind)
                    .await
            })
            .await?;
        ctx.render(&found, |found| format_nodes(found, "no matches"))
    }
}

#[derive(Serialize)]
struct NodeInfo {
    node: Node,
    path: Vec<Node>,
}

/// Show one node and its location.
#[derive(Args, Debug, Clone)]
pub struct Info {
    pub id: NodeId,
}

#[async_trait::async_trait]
impl Op for Info {
    type Error = CommandError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let path = ctx
            .with_vault(|vault| async move {
                vault.tree().path(ctx.owner, self.id).await
            })
            .await?;
        let node = path
            .last()
            .cloned()
            .ok_or_else(|| CommandError::Usage(format!("node {} has no path", self.id)))?;
        let info = NodeInfo { node, path };

        ctx.render(&info, |info| {
            let location = info
                .path
                .iter()
                .map(|n| n.name.as_str())
                .collect::<Vec<_>>()
                .join("/");
            let mut lines = vec![format_node(&info.node), format!("path: /{}", location)];
            if let Some(mime) = &info.node.mime_type {
                lines.push(format!("type: {}", mime));
            }
            if let Some(digest) = &info.node.digest {
                lines.push(format!("sha256: {}", digest));
            }
            lines.push(format!("updated: {}", info.node.updated_at.to_rfc3339()));
            lines.join("\n")
        })
    }
}
