// HLS playlist rewriting for a cache-addressed local proxy
pub mod error;
pub mod fingerprint;
pub mod resolve;
pub mod rewrite;

pub use error::RewriteError;
pub use fingerprint::fingerprint;
pub use resolve::{
    ProxyRoute, decode_source_url, encode_source_url, key_proxy_url, playlist_proxy_url,
    resolve_reference, segment_proxy_url,
};
pub use rewrite::{
    FetchItem, FetchKind, ParsedPlaylist, VariantRewrite, best_variant_url, key_filename,
    parse_playlist, rewrite_master, rewrite_variant, segment_filename,
};

// Re-export the playlist tree so callers don't need a direct m3u8-rs dependency
pub use m3u8_rs::{MasterPlaylist, MediaPlaylist};
