//! Nimbus CLI - provision and deploy serverless function apps.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(about = "Provision function apps and run the deployment workflow")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full provisioning and deployment workflow
    Run {
        /// Configuration file (defaults to deploy.toml)
        #[arg(short, long, env = "NIMBUS_CONFIG")]
        config: Option<PathBuf>,

        /// Run against an in-memory client instead of the management API
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration and print the steps a run would perform
    Check {
        /// Configuration file (defaults to deploy.toml)
        #[arg(short, long, env = "NIMBUS_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result: Result<(), anyhow::Error> = match cli.command {
        Commands::Run { config, dry_run } => {
            commands::run::run(commands::run::RunArgs { config, dry_run })
                .await
                .map_err(Into::into)
        }
        Commands::Check { config } => commands::check::run(config).map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
