//! kubectl-cache - get or list Kubernetes resources with a local cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kubecache::cli::{commands, Cli, Commands};
use kubecache::error::KubecacheResult;
use kubecache::proxymgr::default_data_root;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> KubecacheResult<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => EnvFilter::new("kubecache=warn"),
        1 => EnvFilter::new("kubecache=info"),
        _ => EnvFilter::new("kubecache=debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let data_root = cli.data_root.clone().unwrap_or_else(default_data_root);

    // Dispatch to command
    match cli.command {
        Commands::Get(args) => commands::get(args, data_root, cli.client).await,
        Commands::Proxies(args) => commands::proxies(args, data_root).await,
        Commands::Shutdown(args) => commands::shutdown(args, data_root).await,
        Commands::Proxy(args) => {
            let config = cli.client.to_client_config()?;
            commands::proxy(args, config).await
        }
        Commands::InternalProxy(args) => {
            let config = cli.client.to_client_config()?;
            commands::internal_proxy(args, data_root, config).await
        }
    }
}
