//! Reference resolution and the proxy URL codec.
//!
//! Proxy URLs embed the absolute source URL as a single percent-encoded path
//! segment, so the proxy can always fall back to the original resource.

use tracing::debug;
use url::Url;

use crate::RewriteError;

/// Route families exposed under the proxy base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRoute {
    /// Playlist (master or variant)
    Playlist,
    /// Media segment or initialization section
    Segment,
    /// Encryption key
    Key,
}

impl ProxyRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playlist => "m3u8",
            Self::Segment => "seg",
            Self::Key => "key",
        }
    }
}

/// Resolve a playlist reference against the playlist's own URL (RFC 3986).
///
/// References that cannot be resolved are returned unchanged so a single bad
/// URI never aborts the rewrite of a whole playlist.
pub fn resolve_reference(base: &Url, reference: &str) -> String {
    match base.join(reference) {
        Ok(resolved) => resolved.to_string(),
        Err(e) => {
            debug!(reference, error = %e, "Leaving unresolvable reference as-is");
            reference.to_string()
        }
    }
}

/// Percent-encode an absolute URL into one path segment.
pub fn encode_source_url(url: &str) -> String {
    urlencoding::encode(url).into_owned()
}

/// Inverse of [`encode_source_url`].
pub fn decode_source_url(encoded: &str) -> Result<String, RewriteError> {
    urlencoding::decode(encoded)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| RewriteError::InvalidEncoding {
            input: encoded.to_string(),
        })
}

/// `{proxy_base}/m3u8/{encoded}`
pub fn playlist_proxy_url(proxy_base: &str, source: &str) -> String {
    format!(
        "{}/{}/{}",
        proxy_base.trim_end_matches('/'),
        ProxyRoute::Playlist.as_str(),
        encode_source_url(source)
    )
}

/// `{proxy_base}/seg/{task_id}/{filename}/{encoded}`
pub fn segment_proxy_url(proxy_base: &str, task_id: &str, filename: &str, source: &str) -> String {
    file_proxy_url(ProxyRoute::Segment, proxy_base, task_id, filename, source)
}

/// `{proxy_base}/key/{task_id}/{filename}/{encoded}`
pub fn key_proxy_url(proxy_base: &str, task_id: &str, filename: &str, source: &str) -> String {
    file_proxy_url(ProxyRoute::Key, proxy_base, task_id, filename, source)
}

fn file_proxy_url(
    route: ProxyRoute,
    proxy_base: &str,
    task_id: &str,
    filename: &str,
    source: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        proxy_base.trim_end_matches('/'),
        route.as_str(),
        task_id,
        filename,
        encode_source_url(source)
    )
}
