use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::types::{Digest, NodeId, OwnerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    File,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Folder => "folder",
            NodeKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "folder" => Some(NodeKind::Folder),
            "file" => Some(NodeKind::File),
            _ => None,
        }
    }
}

impl FromStr for NodeKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| VaultError::InvalidInput(format!("unknown node kind '{s}'")))
    }
}

/// One file or folder in an owner's hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub owner: OwnerId,
    /// `None` at root level
    pub parent: Option<NodeId>,
    pub name: String,
    pub kind: NodeKind,
    /// Bytes; always 0 for folders
    pub size: u64,
    pub mime_type: Option<String>,
    pub digest: Option<Digest>,
    #[serde(skip)]
    pub storage_key: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    /// The node whose trashing soft-deleted this one
    pub trash_root: Option<NodeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }

    /// Trashed directly, rather than along with an ancestor.
    pub fn is_trash_root(&self) -> bool {
        self.is_deleted && self.trash_root == Some(self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    Size,
    UpdatedAt,
}

impl SortKey {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::UpdatedAt => "updated_at",
        }
    }
}

impl FromStr for SortKey {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(SortKey::Name),
            "size" => Ok(SortKey::Size),
            "updated_at" | "updated" => Ok(SortKey::UpdatedAt),
            _ => Err(VaultError::InvalidInput(format!("unknown sort key '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(VaultError::InvalidInput(format!("unknown sort order '{s}'"))),
        }
    }
}

/// Filter, ordering and paging for child listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    pub kind: Option<NodeKind>,
    pub sort: SortKey,
    pub order: SortOrder,
    pub offset: u64,
    pub limit: u64,
}

impl ListOptions {
    pub const DEFAULT_LIMIT: u64 = 50;
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            kind: None,
            sort: SortKey::default(),
            order: SortOrder::default(),
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// A page of children plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub nodes: Vec<Node>,
    pub total: u64,
}

/// Folder hierarchy without files.
#[derive(Debug, Clone, Serialize)]
pub struct FolderTree {
    pub id: NodeId,
    pub name: String,
    pub children: Vec<FolderTree>,
}
