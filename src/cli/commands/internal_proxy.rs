//! Internal-proxy command - the proxy daemon
//!
//! Spawned by `new_for_config` as `<self> internal-proxy [flags]`. Claims
//! the fingerprint directory (failing fast when a peer already owns it),
//! serves the caching proxy on an OS-assigned loopback port, publishes the
//! port, and releases the directory on graceful shutdown. Exits zero on the
//! graceful paths, including idle timeout.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cli::args::InternalProxyArgs;
use crate::client::UpstreamClient;
use crate::config::{parse_duration_secs, ClientConfig};
use crate::error::{KubecacheError, KubecacheResult};
use crate::proxy::informers::ApiServerSource;
use crate::proxy::{
    default_table_convertor, CacheProxyHandler, ListenerConfig, PassthroughHandler, ProxyServer,
    ServerOptions,
};
use crate::proxymgr::{fingerprint, ProxyRegistry};

use super::shutdown_signal;

/// Execute the internal-proxy command
pub async fn execute(
    args: InternalProxyArgs,
    data_root: std::path::PathBuf,
    config: ClientConfig,
) -> KubecacheResult<()> {
    let max_idle_time = Duration::from_secs(parse_duration_secs(&args.max_idle_time)?);

    // claim first: losing the race to a peer daemon is an expected outcome
    // and the peer is authoritative
    let registry = ProxyRegistry::new(data_root);
    let fp = fingerprint(&config);
    let handle = registry.claim(&fp)?;
    info!("claimed proxy slot {}", fp);

    let result = serve(&registry, &handle, &config, max_idle_time).await;

    // the lock outlives every task that used the directory; release only
    // after serve has fully returned
    registry.release(handle)?;
    result
}

async fn serve(
    registry: &ProxyRegistry,
    handle: &crate::proxymgr::ClaimHandle,
    config: &ClientConfig,
    max_idle_time: Duration,
) -> KubecacheResult<()> {
    let client = UpstreamClient::new(config)?;
    let source = Arc::new(ApiServerSource::new(client.clone()));
    let cache = CacheProxyHandler::new(source, "/", Some(default_table_convertor(Some(client.clone()))));
    let passthrough = PassthroughHandler::new(client, "/");

    let server = ProxyServer::new(
        ServerOptions {
            listener: ListenerConfig::Tcp {
                address: "127.0.0.1".to_string(),
                port: 0,
            },
            max_idle_time,
            ..Default::default()
        },
        cache,
        passthrough,
    );

    let mut ready = server.ready();
    let mut serve_task = tokio::spawn(server.serve(shutdown_signal()));

    // the listener may fail to bind; watch both the ready channel and the
    // serve task so a bind error surfaces instead of hanging
    let addr = tokio::select! {
        changed = ready.wait_for(|addr| addr.is_some()) => match changed {
            Ok(addr) => addr.clone(),
            Err(_) => None,
        },
        result = &mut serve_task => {
            return match result {
                Ok(serve_result) => serve_result,
                Err(e) => Err(KubecacheError::Internal(format!("serve task failed: {e}"))),
            };
        }
    };

    let port = addr
        .as_ref()
        .and_then(|addr| addr.port())
        .ok_or_else(|| KubecacheError::Internal("server reported no TCP port".to_string()))?;
    registry.publish_port(handle, port)?;
    debug!("published port {} for {}", port, handle.fingerprint());

    match serve_task.await {
        Ok(result) => result,
        Err(e) => Err(KubecacheError::Internal(format!("serve task failed: {e}"))),
    }
}
