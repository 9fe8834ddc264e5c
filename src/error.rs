//! Error types for kubecache
//!
//! All modules use `KubecacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

use crate::meta::status::Status;

/// Result type alias for kubecache operations
pub type KubecacheResult<T> = Result<T, KubecacheError>;

/// All errors that can occur in kubecache
#[derive(Error, Debug)]
pub enum KubecacheError {
    // Registry errors
    #[error("proxy lock for {fingerprint} is already claimed by another process")]
    AlreadyClaimed { fingerprint: String },

    #[error("proxy not found: {0}")]
    ProxyNotFound(String),

    #[error("invalid pid file {path}: {reason}")]
    InvalidPidFile { path: PathBuf, reason: String },

    #[error("invalid port file {path}: {reason}")]
    InvalidPortFile { path: PathBuf, reason: String },

    // Manager errors
    #[error("failed to spawn proxy daemon: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("failed to signal proxy process {pid}: {reason}")]
    SignalFailed { pid: i32, reason: String },

    #[error("timed out waiting for {0}")]
    WaitTimeout(String),

    // Client configuration errors
    #[error("invalid client configuration: {0}")]
    ConfigInvalid(String),

    #[error("no API server address configured (set --server)")]
    NoServer,

    // Proxy server errors
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // Upstream errors
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("watch stream for {gvr} ended: {reason}")]
    WatchClosed { gvr: String, reason: String },

    // Kubernetes API errors carrying an embedded Status body
    #[error("{}", .0.message)]
    Api(Status),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl KubecacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap a Kubernetes `Status` as an error
    pub fn api(status: Status) -> Self {
        Self::Api(status)
    }

    /// The embedded `Status`, if this is an API error
    pub fn as_api_status(&self) -> Option<&Status> {
        match self {
            Self::Api(status) => Some(status),
            _ => None,
        }
    }

    /// Whether the error means "no such record on disk"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ProxyNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = KubecacheError::AlreadyClaimed {
            fingerprint: "ab12cd34".to_string(),
        };
        assert!(err.to_string().contains("ab12cd34"));
    }

    #[test]
    fn api_status_roundtrip() {
        let status = Status::not_found("", "pods", "p1");
        let err = KubecacheError::api(status);
        assert_eq!(err.as_api_status().map(|s| s.code), Some(404));
    }

    #[test]
    fn not_found_detection() {
        assert!(KubecacheError::ProxyNotFound("x".into()).is_not_found());
        assert!(!KubecacheError::Internal("x".into()).is_not_found());
    }
}
