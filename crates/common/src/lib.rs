/**
 * Runtime settings for the storage core:
 *  quotas, tree limits, share defaults
 *  and retry behaviour.
 */
pub mod config;
/**
 * Content-addressed deduplication index
 *  with reference counting and blob
 *  reclamation.
 */
pub mod content;
/**
 * SQLite persistence and migrations.
 */
pub mod database;
pub mod error;
mod locks;
/**
 * Per-owner byte accounting.
 */
pub mod quota;
/**
 * Share links, their validity rules
 *  and scope checks.
 */
pub mod share;
/**
 * Soft delete, restore and purge.
 */
pub mod trash;
/**
 * The per-owner folder/file hierarchy.
 */
pub mod tree;
pub mod types;
/**
 * Facade wiring every component together
 *  for uploads, downloads and share reads.
 */
pub mod vault;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub use object_store;

pub mod prelude {
    pub use crate::config::{RetryPolicy, TreeLimits, VaultConfig};
    pub use crate::content::{
        ContentEntry, ContentIndex, ReclaimReport, RecountReport, Registration,
    };
    pub use crate::database::Database;
    pub use crate::error::{ErrorKind, Result, VaultError};
    pub use crate::quota::{QuotaLedger, Usage};
    pub use crate::share::{
        PasswordHasher, Sha256PasswordHasher, Share, ShareKind, ShareOptions, ShareRegistry,
    };
    pub use crate::trash::{PurgeReport, TrashLifecycle};
    pub use crate::tree::{
        FolderTree, ListOptions, Listing, Node, NodeKind, NodeTree, SortKey, SortOrder,
    };
    pub use crate::types::{Digest, NodeId, OwnerId, ShareId};
    pub use crate::vault::{SharedView, Vault};
    pub use crate::version::build_info;
}
