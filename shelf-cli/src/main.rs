//! Shelf: keep a library of module folders up to date.
//!
//! # Usage
//!
//! ```text
//! shelf [--home <dir>] [--yes] [--verbose] check
//! shelf update
//! shelf status [--json]
//! shelf subscribe <module> [--submodule <name>]
//! shelf unsubscribe <module> [--submodule <name>] [--silent]
//! shelf add <manifest-url>
//! shelf remove <module>
//! ```

mod commands;
mod session;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use commands::{
    modules::{AddArgs, RemoveArgs},
    status::StatusArgs,
    subscribe::{SubscribeArgs, UnsubscribeArgs},
    update::{CheckArgs, UpdateArgs},
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "shelf",
    version,
    about = "Install and update published module folders",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Home directory holding `.shelf/` (defaults to the user's home).
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Answer yes to every confirmation.
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a normal update pass; only stale data is refreshed.
    Check(CheckArgs),

    /// Refresh everything now, regardless of when it was last checked.
    Update(UpdateArgs),

    /// Show installed and available versions.
    Status(StatusArgs),

    /// Resume updates for a module or submodule.
    Subscribe(SubscribeArgs),

    /// Stop updates for a module or submodule, optionally deleting it.
    Unsubscribe(UnsubscribeArgs),

    /// Register a module from a manifest URL outside the catalog.
    Add(AddArgs),

    /// Unregister a module added with `shelf add`.
    Remove(RemoveArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    session::init_tracing(cli.global.verbose);

    match cli.command {
        Commands::Check(args) => args.run(&cli.global).await,
        Commands::Update(args) => args.run(&cli.global).await,
        Commands::Status(args) => args.run(&cli.global),
        Commands::Subscribe(args) => args.run(&cli.global).await,
        Commands::Unsubscribe(args) => args.run(&cli.global).await,
        Commands::Add(args) => args.run(&cli.global).await,
        Commands::Remove(args) => args.run(&cli.global).await,
    }
}
