pub use clap::Parser;

use std::path::PathBuf;

use common::types::OwnerId;

#[derive(Parser, Debug)]
#[command(name = "filevault")]
#[command(about = "Deduplicating file vault with quotas, trash and share links")]
pub struct Args {
    /// Path to the filevault state directory (defaults to ~/.filevault)
    #[arg(long, global = true, env = "FILEVAULT_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Account to act as
    #[arg(long, global = true, default_value = "1", env = "FILEVAULT_OWNER")]
    pub owner: OwnerId,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: crate::Command,
}
