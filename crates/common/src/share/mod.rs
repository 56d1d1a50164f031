//! Share links: capability codes that expose one node's subtree.
//!
//! Validity (expiry and access limit) is re-checked on every resolve, and the
//! access counter moves in the same conditional update that checks the
//! limit, so the last slot goes to exactly one caller.

mod password;

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::VaultConfig;
use crate::database::shares::{self, NewShare};
use crate::database::{nodes, Database};
use crate::error::{Result, VaultError};
use crate::tree::NodeTree;
use crate::types::{now_millis, to_db_size, to_millis, NodeId, OwnerId, ShareId};

pub use password::{PasswordHasher, Sha256PasswordHasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareKind {
    #[default]
    Permanent,
    Temporary,
}

impl ShareKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShareKind::Permanent => "permanent",
            ShareKind::Temporary => "temporary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permanent" => Some(ShareKind::Permanent),
            "temporary" => Some(ShareKind::Temporary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Share {
    pub id: ShareId,
    pub code: String,
    pub owner: OwnerId,
    pub node: NodeId,
    pub kind: ShareKind,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) password_hash: Option<String>,
    pub access_count: u64,
    /// `None` means unlimited
    pub max_access_count: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Share {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_access_count
            .is_some_and(|max| self.access_count >= max)
    }
}

/// Constraints for a new share.
#[derive(Debug, Clone, Default)]
pub struct ShareOptions {
    pub kind: ShareKind,
    /// Temporary shares default to the configured lifetime
    pub expires_at: Option<DateTime<Utc>>,
    pub password: Option<String>,
    /// `Some(0)` is the same as unlimited
    pub max_access_count: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ShareRegistry {
    db: Database,
    tree: NodeTree,
    hasher: Arc<dyn PasswordHasher>,
    code_attempts: u32,
    default_ttl: Option<TimeDelta>,
}

impl ShareRegistry {
    pub fn new(db: Database, tree: NodeTree, config: &VaultConfig) -> Self {
        Self::with_hasher(db, tree, config, Arc::new(Sha256PasswordHasher))
    }

    pub fn with_hasher(
        db: Database,
        tree: NodeTree,
        config: &VaultConfig,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            db,
            tree,
            hasher,
            code_attempts: config.share_code_attempts.max(1),
            default_ttl: config.default_share_ttl(),
        }
    }

    pub async fn create(&self, owner: OwnerId, node: NodeId, opts: &ShareOptions) -> Result<Share> {
        self.tree.get_active(owner, node).await?;

        let now = Utc::now();
        let expires_at = match (opts.kind, opts.expires_at) {
            (ShareKind::Permanent, Some(_)) => {
                return Err(VaultError::InvalidInput(
                    "permanent shares cannot expire".into(),
                ))
            }
            (ShareKind::Permanent, None) => None,
            (ShareKind::Temporary, Some(at)) if at <= now => {
                return Err(VaultError::InvalidInput(
                    "expiry must be in the future".into(),
                ))
            }
            (ShareKind::Temporary, Some(at)) => Some(at),
            (ShareKind::Temporary, None) => {
                let at = self
                    .default_ttl
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .ok_or_else(|| {
                        VaultError::InvalidInput("default share lifetime is out of range".into())
                    })?;
                Some(at)
            }
        };
        let password_hash = opts
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| self.hasher.hash(p));
        let max_access_count = match opts.max_access_count {
            None | Some(0) => None,
            Some(max) => Some(to_db_size(max)?),
        };

        for _ in 0..self.code_attempts {
            let code = generate_code();
            let new = NewShare {
                code: &code,
                owner,
                node,
                kind: opts.kind,
                expires_at: expires_at.map(to_millis),
                password_hash: password_hash.as_deref(),
                max_access_count,
            };
            match shares::insert(self.db.pool(), &new, now_millis()).await {
                Ok(share) => {
                    info!(
                        owner = %owner,
                        node = %node,
                        share = %share.id,
                        kind = share.kind.as_str(),
                        "share created"
                    );
                    return Ok(share);
                }
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    debug!("share code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(VaultError::inconsistent(format!(
            "no unused share code after {} attempts",
            self.code_attempts
        )))
    }

    /// Validate `code` and count one access.
    ///
    /// Checks run in order: unknown code (or trashed target), expiry,
    /// password, access limit.
    pub async fn resolve(&self, code: &str, password: Option<&str>) -> Result<Share> {
        let share = shares::get_by_code(self.db.pool(), code)
            .await?
            .ok_or_else(share_not_found)?;

        let target_live = nodes::get_any(self.db.pool(), share.node)
            .await?
            .is_some_and(|n| n.is_active());
        if !target_live {
            return Err(share_not_found());
        }
        if share.is_expired_at(Utc::now()) {
            return Err(VaultError::Expired);
        }
        if let Some(stored) = &share.password_hash {
            match password.filter(|p| !p.is_empty()) {
                None => return Err(VaultError::PasswordRequired),
                Some(p) if !self.hasher.verify(p, stored) => {
                    return Err(VaultError::PasswordMismatch)
                }
                Some(_) => {}
            }
        }
        if share.is_exhausted() {
            return Err(VaultError::AccessLimitReached);
        }

        if let Some(share) = shares::consume(self.db.pool(), code, now_millis()).await? {
            debug!(share = %share.id, accesses = share.access_count, "share resolved");
            return Ok(share);
        }

        // Lost a race; report why the conditional update refused
        let share = shares::get_by_code(self.db.pool(), code)
            .await?
            .ok_or_else(share_not_found)?;
        if share.is_expired_at(Utc::now()) {
            Err(VaultError::Expired)
        } else {
            Err(VaultError::AccessLimitReached)
        }
    }

    /// Whether `target` is the shared node or lies beneath it.
    pub async fn scope_check(&self, share: &Share, target: NodeId) -> Result<bool> {
        self.tree.is_within(share.node, target).await
    }

    pub async fn revoke(&self, owner: OwnerId, id: ShareId) -> Result<()> {
        if !shares::delete(self.db.pool(), owner, id).await? {
            return Err(share_not_found());
        }
        info!(owner = %owner, share = %id, "share revoked");
        Ok(())
    }

    /// The owner's shares, newest first.
    pub async fn list(&self, owner: OwnerId) -> Result<Vec<Share>> {
        Ok(shares::list(self.db.pool(), owner).await?)
    }

    pub async fn get(&self, owner: OwnerId, id: ShareId) -> Result<Share> {
        shares::get(self.db.pool(), owner, id)
            .await?
            .ok_or_else(share_not_found)
    }
}

fn share_not_found() -> VaultError {
    VaultError::NotFound("share".into())
}

/// 128 random bits as lowercase hex.
fn generate_code() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(expires_at: Option<DateTime<Utc>>, access: u64, max: Option<u64>) -> Share {
        Share {
            id: ShareId(1),
            code: generate_code(),
            owner: OwnerId(1),
            node: NodeId(1),
            kind: ShareKind::Temporary,
            expires_at,
            password_hash: None,
            access_count: access,
            max_access_count: max,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), 32);
        assert!(code.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_ne!(code, generate_code());
    }

    #[test]
    fn test_validity_predicates() {
        let now = Utc::now();
        assert!(!share(None, 100, None).is_exhausted());
        assert!(share(None, 3, Some(3)).is_exhausted());
        assert!(!share(None, 2, Some(3)).is_exhausted());
        assert!(share(Some(now), 0, None).is_expired_at(now));
        assert!(!share(Some(now + chrono::Duration::seconds(5)), 0, None).is_expired_at(now));
        assert!(!share(None, 0, None).is_expired_at(now));
    }
}
