//! kubecache - a client-side cache for the Kubernetes API
//!
//! Serves GET and LIST from a watch-backed local proxy daemon, one daemon
//! per client-configuration fingerprint, and passes every other request
//! through to the API server unchanged.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod meta;
pub mod proxy;
pub mod proxymgr;
pub mod ui;

pub use error::{KubecacheError, KubecacheResult};
