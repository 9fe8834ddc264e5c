//! CLI command implementations

pub mod get;
pub mod internal_proxy;
pub mod proxies;
pub mod proxy;
pub mod shutdown;

pub use get::execute as get;
pub use internal_proxy::execute as internal_proxy;
pub use proxies::execute as proxies;
pub use proxy::execute as proxy;
pub use shutdown::execute as shutdown;

/// Resolves when the process receives SIGINT or SIGTERM
#[cfg(unix)]
pub(crate) async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("installing SIGTERM handler: {}", e);
            // fall back to Ctrl-C only
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
pub(crate) async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
