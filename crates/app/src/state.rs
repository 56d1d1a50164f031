use std::{fs, path::PathBuf};

use common::config::VaultConfig;
use common::object_store::ObjectStoreConfig;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "filevault";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const BLOBS_DIR_NAME: &str = "blobs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where file contents are stored
    #[serde(default)]
    pub blob_store: ObjectStoreConfig,
    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Also write daily-rotated logs here
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub vault: VaultConfig,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            blob_store: ObjectStoreConfig::default(),
            log_level: default_log_level(),
            log_dir: None,
            vault: VaultConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the state directory (~/.filevault)
    pub vault_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the state directory path (custom or default ~/.filevault)
    pub fn vault_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Default blob location inside the state directory.
    pub fn local_blobs_path(vault_dir: &std::path::Path) -> PathBuf {
        vault_dir.join(BLOBS_DIR_NAME)
    }

    /// Initialize a new state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let vault_dir = Self::vault_dir(custom_path)?;

        if vault_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&vault_dir)?;

        let config = config.unwrap_or_default();
        if let ObjectStoreConfig::Local { path } = &config.blob_store {
            fs::create_dir_all(path)?;
        }

        let config_path = vault_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // the schema is created by the first connection
        let db_path = vault_dir.join(DB_FILE_NAME);

        Ok(Self {
            vault_dir,
            db_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the state directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let vault_dir = Self::vault_dir(custom_path)?;

        if !vault_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = vault_dir.join(DB_FILE_NAME);
        let config_path = vault_dir.join(CONFIG_FILE_NAME);

        if !db_path.exists() {
            return Err(StateError::MissingFile(DB_FILE_NAME.to_string()));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            vault_dir,
            db_path,
            config_path,
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("filevault directory not initialized. Run 'filevault init' first")]
    NotInitialized,

    #[error("filevault directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
