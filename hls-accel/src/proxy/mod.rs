//! Proxy core: upstream access and playlist handling.

pub mod service;
pub mod upstream;

pub use service::{ProxyService, proxy_base_for_host};
pub use upstream::UpstreamClient;
