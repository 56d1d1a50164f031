use std::error::Error;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use common::database::Database;
use common::error::VaultError;
use common::object_store::{BlobStoreError, ObjectStorage};
use common::types::OwnerId;
use common::vault::Vault;

use crate::state::{AppState, StateError};

#[derive(Debug, Clone)]
pub struct OpContext {
    /// Optional custom config path (defaults to ~/.filevault)
    pub config_path: Option<PathBuf>,
    /// Principal every command acts as
    pub owner: OwnerId,
    /// Print results as JSON instead of text
    pub json: bool,
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>, owner: OwnerId, json: bool) -> Self {
        Self {
            config_path,
            owner,
            json,
        }
    }

    /// Open the vault described by the state directory.
    ///
    /// Callers own the returned handle and should `close()` it when done;
    /// [`OpContext::with_vault`] does that for them.
    pub async fn vault(&self) -> Result<Vault, CommandError> {
        let state = AppState::load(self.config_path.clone())?;
        let db = Database::connect(&state.db_path).await?;
        let blobs = ObjectStorage::new(state.config.blob_store.clone()).await?;
        tracing::debug!(backend = blobs.backend(), owner = %self.owner, "vault opened");
        Ok(Vault::new(db, Arc::new(blobs), state.config.vault))
    }

    /// Open the vault, run `f` against it, and close it again whether or
    /// not `f` succeeded.
    pub async fn with_vault<T, E, F, Fut>(&self, f: F) -> Result<T, CommandError>
    where
        F: FnOnce(Vault) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<CommandError>,
    {
        let vault = self.vault().await?;
        let result = f(vault.clone()).await;
        vault.close().await;
        result.map_err(Into::into)
    }

    /// JSON when `--json` was given, otherwise the text rendering.
    pub fn render<T: Serialize>(
        &self,
        value: &T,
        text: impl FnOnce(&T) -> String,
    ) -> Result<String, CommandError> {
        if self.json {
            Ok(serde_json::to_string_pretty(value)?)
        } else {
            Ok(text(value))
        }
    }
}

/// Failure of any command that talks to the vault.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("blob store unavailable: {0}")]
    BlobStore(#[from] BlobStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $type:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($type),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$type as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$type as $crate::cli::op::Op>::Error),
            )*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Output = OpOutput;
            type Error = OpError;

            async fn execute(&self, ctx: &$crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => {
                            op.execute(ctx).await
                                .map(OpOutput::$variant)
                                .map_err(OpError::$variant)
                        },
                    )*
                }
            }
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        OpOutput::$variant(output) => write!(f, "{}", output),
                    )*
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_switches_on_json_flag() {
        let usage = serde_json::json!({ "total_used": 3 });

        let text = OpContext::new(None, OwnerId(1), false);
        let out = text.render(&usage, |_| "3 bytes".to_string()).unwrap();
        assert_eq!(out, "3 bytes");

        let json = OpContext::new(None, OwnerId(1), true);
        let out = json.render(&usage, |_| "3 bytes".to_string()).unwrap();
        assert!(out.contains("\"total_used\": 3"));
    }

    #[tokio::test]
    async fn test_vault_requires_init() {
        let temp = tempfile::TempDir::new().unwrap();
        let ctx = OpContext::new(Some(temp.path().join("missing")), OwnerId(1), false);
        assert!(matches!(
            ctx.vault().await,
            Err(CommandError::State(StateError::NotInitialized))
        ));
    }

    #[tokio::test]
    async fn test_with_vault_closes_after_failure() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("vault");
        AppState::init(Some(dir.clone()), None).unwrap();
        let ctx = OpContext::new(Some(dir), OwnerId(1), false);

        let mut opened = None;
        let result = ctx
            .with_vault(|vault| {
                opened = Some(vault.database().clone());
                async move {
                    vault
                        .tree()
                        .get_active(OwnerId(1), common::types::NodeId(404))
                        .await
                }
            })
            .await;
        assert!(matches!(result, Err(CommandError::Vault(VaultError::NotFound(_)))));
        assert!(opened.unwrap().is_closed());
    }
}
