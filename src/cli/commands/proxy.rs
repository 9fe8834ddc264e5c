//! Proxy command - run a caching proxy in the foreground

use std::sync::Arc;
use std::time::Duration;

use console::style;

use crate::cli::args::ProxyArgs;
use crate::client::UpstreamClient;
use crate::config::{parse_duration_secs, ClientConfig};
use crate::error::KubecacheResult;
use crate::proxy::informers::ApiServerSource;
use crate::proxy::{
    default_table_convertor, CacheProxyHandler, ListenerConfig, PassthroughHandler, ProxyServer,
    ServerOptions,
};
use crate::ui::{self, UiContext};

use super::shutdown_signal;

/// Execute the proxy command
pub async fn execute(args: ProxyArgs, config: ClientConfig) -> KubecacheResult<()> {
    let ctx = UiContext::detect();
    let max_idle_time = Duration::from_secs(parse_duration_secs(&args.max_idle_time)?);

    let listener = match &args.unix_socket {
        Some(path) => ListenerConfig::Unix { path: path.clone() },
        None => ListenerConfig::Tcp {
            address: args.address.clone(),
            port: args.port,
        },
    };

    let client = UpstreamClient::new(&config)?;
    let source = Arc::new(ApiServerSource::new(client.clone()));
    let cache = CacheProxyHandler::new(
        source,
        &args.api_prefix,
        Some(default_table_convertor(Some(client.clone()))),
    );
    let passthrough = PassthroughHandler::new(client, &args.api_prefix);

    let server = ProxyServer::new(
        ServerOptions {
            listener,
            api_proxy_prefix: args.api_prefix.clone(),
            static_prefix: args.www_prefix.clone(),
            static_file_base: args.www.clone(),
            max_idle_time,
        },
        cache,
        passthrough,
    );

    let mut ready = server.ready();
    let serve_task = tokio::spawn(server.serve(shutdown_signal()));

    if let Ok(addr) = ready.wait_for(|addr| addr.is_some()).await {
        if let Some(addr) = addr.clone() {
            ui::step_ok(&ctx, &format!("Serving on {}", style(addr).cyan()));
        }
    }

    match serve_task.await {
        Ok(result) => result,
        Err(e) => Err(crate::error::KubecacheError::Internal(format!(
            "serve task failed: {e}"
        ))),
    }
}
