// CLI modules
mod cli;
mod logging;
mod state;

use clap::{Parser, Subcommand};
use cli::{
    args::Args, op::Op, Account, Cp, Find, Get, Info, Init, Link, Ls, Mkdir, Mv, Put, Rename,
    Rm, Share, Trash, Tree, Version,
};

command_enum! {
    (Init, Init),
    (Version, Version),
    (Account, Account),
    (Put, Put),
    (Link, Link),
    (Mkdir, Mkdir),
    (Ls, Ls),
    (Tree, Tree),
    (Find, Find),
    (Info, Info),
    (Rename, Rename),
    (Mv, Mv),
    (Cp, Cp),
    (Get, Get),
    (Rm, Rm),
    (Trash, Trash),
    (Share, Share),
}

async fn run(args: Args) -> anyhow::Result<String> {
    let ctx = cli::op::OpContext::new(args.config_path, args.owner, args.json);
    let output = args.command.execute(&ctx).await?;
    Ok(output.to_string())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // logging follows the state directory's config once it exists
    let config = state::AppState::load(args.config_path.clone())
        .map(|state| state.config)
        .unwrap_or_default();
    let guards = logging::init_logging(
        logging::parse_level(&config.log_level),
        config.log_dir.as_deref(),
    );

    let code = match run(args).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("Error: {:#}", e);
            1
        }
    };

    drop(guards);
    std::process::exit(code);
}
