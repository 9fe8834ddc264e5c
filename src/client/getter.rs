//! Proxy-aware client configuration resolution
//!
//! Wraps any `ClientConfigProvider` and transparently points the resulting
//! configuration at a local cache daemon: find a Ready daemon for the
//! config's fingerprint, or spawn one and wait. The cache is an
//! optimization: on any failure the original upstream configuration is
//! returned unchanged so the user's request always proceeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{ClientConfig, ClientConfigProvider};
use crate::error::KubecacheResult;
use crate::proxymgr::ProxyManager;

/// Default bound on how long a spawn-and-wait may take before falling back
/// to passthrough
pub const DEFAULT_SPAWN_WAIT: Duration = Duration::from_secs(30);

/// `ClientConfigProvider` that rewrites configs to point at a cache daemon
pub struct ProxyClientConfigProvider {
    inner: Arc<dyn ClientConfigProvider>,
    manager: ProxyManager,
    spawn_wait: Duration,
}

impl ProxyClientConfigProvider {
    pub fn new(inner: Arc<dyn ClientConfigProvider>, manager: ProxyManager) -> Self {
        Self {
            inner,
            manager,
            spawn_wait: DEFAULT_SPAWN_WAIT,
        }
    }

    pub fn with_spawn_wait(mut self, spawn_wait: Duration) -> Self {
        self.spawn_wait = spawn_wait;
        self
    }

    async fn resolve_proxy(&self, config: &ClientConfig) -> KubecacheResult<u16> {
        if let Ok(record) = self.manager.get_for_config(config) {
            if record.is_ready() {
                return Ok(record.port);
            }
        }

        let record = tokio::time::timeout(self.spawn_wait, self.manager.new_for_config(config))
            .await
            .map_err(|_| {
                crate::error::KubecacheError::WaitTimeout("proxy daemon readiness".to_string())
            })??;
        Ok(record.port)
    }
}

#[async_trait]
impl ClientConfigProvider for ProxyClientConfigProvider {
    async fn client_config(&self) -> KubecacheResult<ClientConfig> {
        let config = self.inner.client_config().await?;

        match self.resolve_proxy(&config).await {
            Ok(port) => {
                info!("using proxy http://127.0.0.1:{}", port);
                Ok(ClientConfig::local_proxy(port))
            }
            Err(e) => {
                warn!("start cache proxy error, using passthrough mode: {}", e);
                Ok(config)
            }
        }
    }
}
