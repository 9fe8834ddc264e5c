//! The caching proxy: request classification, informers, cache reads,
//! table projection, passthrough forwarding, and the HTTP server tying
//! them together.

pub mod cache_handler;
pub mod indexers;
pub mod informers;
pub mod passthrough;
pub mod request_info;
pub mod server;
pub mod store;
pub mod table_convertor;

pub use cache_handler::CacheProxyHandler;
pub use informers::{ApiServerSource, InformerCache, UpstreamSource};
pub use passthrough::PassthroughHandler;
pub use request_info::{RequestInfo, RequestInfoResolver};
pub use server::{ListenerConfig, ProxyServer, ServerAddr, ServerOptions};
pub use table_convertor::default_table_convertor;
