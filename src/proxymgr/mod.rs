//! Proxy daemon registry and lifecycle
//!
//! At most one daemon serves a given client-config fingerprint on a host.
//! The guarantee comes from an advisory file lock in a per-fingerprint
//! directory; everything else (discovery, spawning, shutdown) is built on
//! reading those directories.

pub mod fingerprint;
pub mod manager;
pub mod record;
pub mod registry;

pub use fingerprint::fingerprint;
pub use manager::ProxyManager;
pub use record::{ProxyRecord, ProxyState};
pub use registry::{ClaimHandle, ProxyRegistry};

use std::path::PathBuf;

/// Default data root: `<home>/.kube`
pub fn default_data_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kube")
}
