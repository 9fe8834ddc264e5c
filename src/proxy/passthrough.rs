//! Passthrough reverse proxy
//!
//! Forwards everything the cache does not serve to the upstream API server
//! byte-for-byte: same method, headers and body, with the configured URI
//! prefix stripped. Responses stream back without buffering, which keeps
//! long-running watch requests working through the proxy.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::client::UpstreamClient;

/// Hop-by-hop headers that must not be forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Forwards requests verbatim to the upstream
pub struct PassthroughHandler {
    client: UpstreamClient,
    uri_prefix: String,
}

impl PassthroughHandler {
    pub fn new(client: UpstreamClient, uri_prefix: &str) -> Self {
        Self {
            client,
            uri_prefix: uri_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Forward one request and stream the upstream response back
    pub async fn forward(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let path = parts.uri.path();
        let stripped = path.strip_prefix(&self.uri_prefix).unwrap_or(path);
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{stripped}?{query}"),
            None => stripped.to_string(),
        };
        let url = self.client.url_for(&path_and_query);
        debug!("PASSTHROUGH {} {}", parts.method, path_and_query);

        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("read request body error: {e}"),
                )
                    .into_response()
            }
        };

        let upstream_request = self
            .client
            .http()
            .request(parts.method, url)
            .headers(filter_headers(&parts.headers))
            .body(body);

        let upstream_response = match upstream_request.send().await {
            Ok(response) => response,
            Err(e) => {
                return (
                    StatusCode::BAD_GATEWAY,
                    format!("forward request error: {e}"),
                )
                    .into_response()
            }
        };

        let mut response = Response::builder().status(upstream_response.status());
        if let Some(headers) = response.headers_mut() {
            *headers = filter_headers(upstream_response.headers());
        }
        response
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .unwrap_or_else(|e| {
                (
                    StatusCode::BAD_GATEWAY,
                    format!("assemble response error: {e}"),
                )
                    .into_response()
            })
    }
}

fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}
