//! liftoff CLI - package, upload and follow application deployments

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::deploy::DeployArgs;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package the application directory and deploy it
    Deploy(DeployArgs),
}

impl Commands {
    const fn verbose(&self) -> bool {
        match self {
            Self::Deploy(args) => args.verbose,
        }
    }
}

fn init_tracing(verbose: bool) {
    // Build output goes to stdout; keep our own logs quiet unless asked
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.command.verbose());

    let code = match cli.command {
        Commands::Deploy(args) => commands::deploy::execute(args).await,
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
