//! The proxy HTTP server
//!
//! One axum app multiplexes the cache handler and the passthrough under the
//! API proxy prefix, with optional static file serving beside them. The
//! listener is either loopback TCP (port 0 for OS-assigned, the internal
//! daemon's mode) or a UNIX socket. The server publishes its bound address
//! through a ready channel, resets an idle deadline on every request, and
//! shuts down gracefully on idle expiry or an external shutdown signal.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::error::{KubecacheError, KubecacheResult};

use super::cache_handler::CacheProxyHandler;
use super::passthrough::PassthroughHandler;

/// Where the server listens; exactly one variant per server
#[derive(Debug, Clone)]
pub enum ListenerConfig {
    /// `address:port`; port 0 asks the OS for a free port
    Tcp { address: String, port: u16 },
    /// UNIX socket path; a stale socket is removed before binding
    Unix { path: PathBuf },
}

/// The resolved listening address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl ServerAddr {
    /// The bound TCP port, when listening on TCP
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Tcp(addr) => Some(addr.port()),
            Self::Unix(_) => None,
        }
    }
}

impl std::fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Proxy server options
pub struct ServerOptions {
    pub listener: ListenerConfig,
    /// URI prefix the API proxy (cache + passthrough) answers under
    pub api_proxy_prefix: String,
    /// URI prefix for static file serving; only used with a file base
    pub static_prefix: String,
    /// Static file base directory; `None` disables static serving
    pub static_file_base: Option<PathBuf>,
    /// Self-terminate after this long without a request; zero disables
    pub max_idle_time: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::Tcp {
                address: "127.0.0.1".to_string(),
                port: 0,
            },
            api_proxy_prefix: "/".to_string(),
            static_prefix: "/static/".to_string(),
            static_file_base: None,
            max_idle_time: Duration::ZERO,
        }
    }
}

struct IdleTimer {
    deadline: Mutex<tokio::time::Instant>,
    max_idle_time: Duration,
    fired: Notify,
}

impl IdleTimer {
    fn new(max_idle_time: Duration) -> Self {
        Self {
            deadline: Mutex::new(tokio::time::Instant::now() + max_idle_time),
            max_idle_time,
            fired: Notify::new(),
        }
    }

    /// Push the deadline out; called for every incoming request
    fn reset(&self) {
        *self.deadline.lock() = tokio::time::Instant::now() + self.max_idle_time;
    }

    /// Sleep until the deadline stops moving, then signal expiry
    async fn run(self: Arc<Self>) {
        loop {
            let deadline = *self.deadline.lock();
            if tokio::time::Instant::now() >= deadline {
                self.fired.notify_one();
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

#[derive(Clone)]
struct AppState {
    cache: Arc<CacheProxyHandler>,
    passthrough: Arc<PassthroughHandler>,
    idle: Option<Arc<IdleTimer>>,
    api_proxy_prefix: String,
    static_prefix: String,
    static_file_base: Option<PathBuf>,
}

/// The proxy server
pub struct ProxyServer {
    options: ServerOptions,
    state: AppState,
    ready_tx: watch::Sender<Option<ServerAddr>>,
    ready_rx: watch::Receiver<Option<ServerAddr>>,
}

impl ProxyServer {
    pub fn new(
        options: ServerOptions,
        cache: CacheProxyHandler,
        passthrough: PassthroughHandler,
    ) -> Self {
        let idle = if options.max_idle_time > Duration::ZERO {
            Some(Arc::new(IdleTimer::new(options.max_idle_time)))
        } else {
            None
        };
        let state = AppState {
            cache: Arc::new(cache),
            passthrough: Arc::new(passthrough),
            idle,
            api_proxy_prefix: options.api_proxy_prefix.clone(),
            static_prefix: options.static_prefix.clone(),
            static_file_base: options.static_file_base.clone(),
        };
        let (ready_tx, ready_rx) = watch::channel(None);
        Self {
            options,
            state,
            ready_tx,
            ready_rx,
        }
    }

    /// A channel that carries the bound address once the listener is up.
    ///
    /// For an internally spawned daemon the signal fires before the port
    /// file exists; the daemon reads the address from here and publishes
    /// it.
    pub fn ready(&self) -> watch::Receiver<Option<ServerAddr>> {
        self.ready_rx.clone()
    }

    /// The resolved local address; `None` before ready
    pub fn addr(&self) -> Option<ServerAddr> {
        self.ready_rx.borrow().clone()
    }

    /// Bind the listener, signal readiness, and serve until `shutdown`
    /// resolves or the idle timer fires. In-flight requests drain before
    /// return.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> KubecacheResult<()> {
        let router = build_router(self.state.clone());

        let idle = self.state.idle.clone();
        if let Some(idle) = idle.clone() {
            tokio::spawn(idle.run());
        }
        let graceful = async move {
            match idle {
                Some(idle) => {
                    tokio::select! {
                        _ = shutdown => debug!("shutdown signal, shutting down server ..."),
                        _ = idle.fired.notified() => info!("idle timeout, shutting down server ..."),
                    }
                }
                None => {
                    shutdown.await;
                    debug!("shutdown signal, shutting down server ...");
                }
            }
        };

        match &self.options.listener {
            ListenerConfig::Tcp { address, port } => {
                let bind_addr = format!("{address}:{port}");
                let listener = tokio::net::TcpListener::bind(&bind_addr)
                    .await
                    .map_err(|e| KubecacheError::Bind {
                        addr: bind_addr,
                        source: e,
                    })?;
                let local = listener
                    .local_addr()
                    .map_err(|e| KubecacheError::io("resolving local address", e))?;
                info!("starting to serve on {}", local);
                let _ = self.ready_tx.send(Some(ServerAddr::Tcp(local)));

                axum::serve(listener, router)
                    .with_graceful_shutdown(graceful)
                    .await
                    .map_err(|e| KubecacheError::io("serving HTTP", e))
            }
            ListenerConfig::Unix { path } => {
                let listener = bind_unix(path)?;
                info!("starting to serve on {}", path.display());
                let _ = self.ready_tx.send(Some(ServerAddr::Unix(path.clone())));

                axum::serve(listener, router)
                    .with_graceful_shutdown(graceful)
                    .await
                    .map_err(|e| KubecacheError::io("serving HTTP", e))
            }
        }
    }
}

/// Bind a UNIX socket: clear a stale socket (never a regular file) and keep
/// the new one owner-only via a temporary umask
#[cfg(unix)]
fn bind_unix(path: &Path) -> KubecacheResult<tokio::net::UnixListener> {
    use std::os::unix::fs::FileTypeExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        if metadata.file_type().is_socket() {
            let _ = std::fs::remove_file(path);
        }
    }

    let old_mask = nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o077));
    let listener = tokio::net::UnixListener::bind(path);
    nix::sys::stat::umask(old_mask);

    listener.map_err(|e| KubecacheError::Bind {
        addr: path.display().to_string(),
        source: e,
    })
}

fn build_router(state: AppState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

/// Route one request: static files, cache, or passthrough
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    if let Some(idle) = &state.idle {
        idle.reset();
    }

    let path = request.uri().path().to_string();

    if let Some(base) = &state.static_file_base {
        if let Some(rel) = path.strip_prefix(state.static_prefix.as_str()) {
            return serve_static(base, rel).await;
        }
    }

    let prefix = state.api_proxy_prefix.trim_end_matches('/');
    if !path.starts_with(prefix) {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }

    let method = request.method().as_str().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    if state.cache.is_cached(&method, &path, &query) {
        debug!("CACHED      {} {}", method, path);
        let accept = request
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let (code, body) = state.cache.serve(&method, &path, &query, &accept).await;
        return json_response(code, &body);
    }

    state.passthrough.forward(request).await
}

fn json_response(code: u16, body: &serde_json::Value) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let raw = match serde_json::to_vec(body) {
        Ok(raw) => raw,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("encode response error: {e}"),
            )
                .into_response()
        }
    };
    (
        status,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )],
        Body::from(raw),
    )
        .into_response()
}

/// Minimal static file serving under a base directory
async fn serve_static(base: &Path, rel: &str) -> Response {
    // refuse traversal out of the base
    if rel.split('/').any(|part| part == "..") {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    let mut target = base.join(rel.trim_start_matches('/'));
    if target.is_dir() {
        target = target.join("index.html");
    }

    match tokio::fs::read(&target).await {
        Ok(contents) => {
            let content_type = HeaderValue::from_static(
                match target.extension().and_then(|e| e.to_str()) {
                    Some("html") => "text/html; charset=utf-8",
                    Some("css") => "text/css",
                    Some("js") => "application/javascript",
                    Some("json") => "application/json",
                    Some("png") => "image/png",
                    Some("svg") => "image/svg+xml",
                    _ => "application/octet-stream",
                },
            );
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], contents).into_response()
        }
        Err(e) => {
            warn!("static file {} error: {}", target.display(), e);
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
    }
}
