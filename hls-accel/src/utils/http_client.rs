use std::{collections::BTreeMap, sync::OnceLock, time::Duration};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::{Error, Result};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Convert configured header pairs into a `HeaderMap`.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::config(format!("Invalid value for header '{name}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Build the client used for upstream playlist and segment requests.
///
/// No overall request timeout is set on the client: pass-through segment bodies
/// are streamed and may legitimately take long. Playlist fetches set their own
/// per-request timeout.
pub fn build_upstream_client(default_headers: HeaderMap) -> reqwest::Client {
    install_rustls_provider();

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .tcp_nodelay(true)
        .pool_max_idle_per_host(20)
        .default_headers(default_headers)
        .build()
        .unwrap_or_else(|error| {
            warn!(error = %error, "Failed to build upstream HTTP client; falling back to reqwest defaults");
            reqwest::Client::new()
        })
}

/// Build a client with an overall per-request timeout (used for RPC calls).
pub fn build_rpc_client(timeout: Duration) -> reqwest::Client {
    install_rustls_provider();

    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|error| {
            warn!(error = %error, "Failed to build RPC HTTP client; falling back to reqwest defaults");
            reqwest::Client::new()
        })
}
