//! Error taxonomy for the storage core.

use object_store::BlobStoreError;

use crate::types::{Digest, NodeId};

/// Coarse classification of a [`VaultError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    NameConflict,
    ParentInvalid,
    QuotaExceeded,
    Expired,
    PasswordRequired,
    PasswordMismatch,
    AccessLimitReached,
    StorageFailure,
    Inconsistent,
    InvalidInput,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::NameConflict => "name_conflict",
            ErrorKind::ParentInvalid => "parent_invalid",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Expired => "expired",
            ErrorKind::PasswordRequired => "password_required",
            ErrorKind::PasswordMismatch => "password_mismatch",
            ErrorKind::AccessLimitReached => "access_limit_reached",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::Inconsistent => "inconsistent",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("an item named '{0}' already exists here")]
    NameConflict(String),

    #[error("invalid parent: {0}")]
    ParentInvalid(String),

    #[error("quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    #[error("share has expired")]
    Expired,

    #[error("share requires a password")]
    PasswordRequired,

    #[error("share password does not match")]
    PasswordMismatch,

    #[error("share access limit reached")]
    AccessLimitReached,

    #[error("storage failure on {key}: {source}")]
    StorageFailure {
        key: String,
        #[source]
        source: BlobStoreError,
    },

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::NotFound(_) => ErrorKind::NotFound,
            VaultError::NameConflict(_) => ErrorKind::NameConflict,
            VaultError::ParentInvalid(_) => ErrorKind::ParentInvalid,
            VaultError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            VaultError::Expired => ErrorKind::Expired,
            VaultError::PasswordRequired => ErrorKind::PasswordRequired,
            VaultError::PasswordMismatch => ErrorKind::PasswordMismatch,
            VaultError::AccessLimitReached => ErrorKind::AccessLimitReached,
            VaultError::StorageFailure { .. } => ErrorKind::StorageFailure,
            VaultError::Inconsistent(_) => ErrorKind::Inconsistent,
            VaultError::InvalidInput(_) => ErrorKind::InvalidInput,
            VaultError::Database(_) | VaultError::Migrate(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show an anonymous share consumer.
    ///
    /// Validation and share-state errors keep their text; storage and
    /// persistence failures are reduced to a generic line so that neither
    /// storage keys nor SQL ever leak.
    pub fn public_message(&self) -> String {
        match self {
            VaultError::NotFound(_) => "not found".to_string(),
            VaultError::StorageFailure { .. } => "storage temporarily unavailable".to_string(),
            VaultError::Inconsistent(_) | VaultError::Database(_) | VaultError::Migrate(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub(crate) fn storage(key: impl Into<String>, source: BlobStoreError) -> Self {
        VaultError::StorageFailure {
            key: key.into(),
            source,
        }
    }

    pub(crate) fn node_not_found(id: NodeId) -> Self {
        VaultError::NotFound(format!("node {id}"))
    }

    pub(crate) fn content_not_found(digest: &Digest) -> Self {
        VaultError::NotFound(format!("content {digest}"))
    }

    /// Log and build an [`VaultError::Inconsistent`]; never swallowed.
    pub(crate) fn inconsistent(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(detail = %msg, "invariant violation detected");
        VaultError::Inconsistent(msg)
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_storage_key() {
        let err = VaultError::storage(
            "42/1f0e/secret-plans.pdf",
            BlobStoreError::NotFound("42/1f0e/secret-plans.pdf".into()),
        );
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(!err.public_message().contains("secret-plans"));
        assert!(err.to_string().contains("secret-plans"));
    }

    #[test]
    fn test_public_message_keeps_share_state() {
        assert_eq!(VaultError::Expired.public_message(), "share has expired");
        assert_eq!(
            VaultError::node_not_found(NodeId(7)).public_message(),
            "not found"
        );
    }
}
