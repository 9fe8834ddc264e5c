//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::ClientConfigFlags;

/// kubectl-cache - get or list Kubernetes resources with a local cache
///
/// Reads are served from a per-configuration proxy daemon that mirrors the
/// cluster through watches; everything else passes through to the API
/// server unchanged.
#[derive(Parser, Debug)]
#[command(name = "kubectl-cache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Path to the data directory holding proxy registrations
    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,

    /// Kubernetes client configuration
    #[command(flatten)]
    pub client: ClientConfigFlags,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Get or list resources through the cache
    Get(GetArgs),

    /// List cache proxy daemons
    Proxies(ProxiesArgs),

    /// Shut down cache proxy daemons
    Shutdown(ShutdownArgs),

    /// Run a caching proxy to the Kubernetes API server in the foreground
    Proxy(ProxyArgs),

    /// Run the proxy daemon (internal component, DO NOT USE)
    #[command(hide = true)]
    InternalProxy(InternalProxyArgs),
}

/// Output format for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Plain,
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Resource to get, e.g. pods or replicasets.apps
    pub resource: String,

    /// Object name; omit to list the collection
    pub name: Option<String>,

    /// Label selector to filter on, e.g. app=web
    #[arg(short = 'l', long = "selector")]
    pub label_selector: Option<String>,

    /// Field selector to filter on, e.g. status.phase=Running
    #[arg(long = "field-selector")]
    pub field_selector: Option<String>,

    /// List across all namespaces
    #[arg(short = 'A', long = "all-namespaces")]
    pub all_namespaces: bool,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Talk to the API server directly instead of through a cache daemon
    #[arg(long)]
    pub no_cache: bool,
}

/// Arguments for the proxies command
#[derive(Parser, Debug)]
pub struct ProxiesArgs {
    /// Proxy names (fingerprints); empty lists all proxies
    pub names: Vec<String>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

/// Arguments for the shutdown command
#[derive(Parser, Debug)]
pub struct ShutdownArgs {
    /// Proxy names (fingerprints) to shut down
    pub names: Vec<String>,

    /// Shut down all proxies
    #[arg(short = 'A', long)]
    pub all: bool,

    /// Do not wait for proxies to exit
    #[arg(long)]
    pub no_wait: bool,

    /// Kill proxies immediately and remove their directories
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the proxy command
#[derive(Parser, Debug)]
pub struct ProxyArgs {
    /// The IP address to serve on
    #[arg(long, default_value = "127.0.0.1")]
    pub address: String,

    /// The port to serve on; 0 picks a free port
    #[arg(short = 'p', long, default_value_t = 8001)]
    pub port: u16,

    /// Serve on a UNIX socket at this path instead of TCP
    #[arg(short = 'u', long = "unix-socket")]
    pub unix_socket: Option<PathBuf>,

    /// Serve static files from this directory
    #[arg(short = 'w', long = "www")]
    pub www: Option<PathBuf>,

    /// URI prefix for static file serving
    #[arg(short = 'P', long = "www-prefix", default_value = "/static/")]
    pub www_prefix: String,

    /// URI prefix the API proxy answers under
    #[arg(long = "api-prefix", default_value = "/")]
    pub api_prefix: String,

    /// Shut down after this long without a request (e.g. 10m); 0 disables
    #[arg(long = "max-idle-time", default_value = "0")]
    pub max_idle_time: String,
}

/// Arguments for the hidden internal-proxy command
#[derive(Parser, Debug)]
pub struct InternalProxyArgs {
    /// Shut down after this long without a request (e.g. 10m); 0 disables
    #[arg(long = "max-idle-time", default_value = "10m")]
    pub max_idle_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn internal_proxy_is_hidden() {
        use clap::CommandFactory;
        let cmd = Cli::command();
        let internal = cmd
            .get_subcommands()
            .find(|c| c.get_name() == "internal-proxy")
            .expect("internal-proxy subcommand exists");
        assert!(internal.is_hide_set());
    }

    #[test]
    fn get_args_parse() {
        let cli = Cli::parse_from([
            "kubectl-cache",
            "get",
            "pods",
            "-n",
            "default",
            "--field-selector",
            "status.phase=Running",
        ]);
        match cli.command {
            Commands::Get(args) => {
                assert_eq!(args.resource, "pods");
                assert_eq!(args.field_selector.as_deref(), Some("status.phase=Running"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.client.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn internal_proxy_default_idle() {
        let cli = Cli::parse_from(["kubectl-cache", "internal-proxy"]);
        match cli.command {
            Commands::InternalProxy(args) => assert_eq!(args.max_idle_time, "10m"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
