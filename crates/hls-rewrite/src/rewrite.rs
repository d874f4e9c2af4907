//! Master and variant playlist rewriting.
//!
//! Every child reference of a playlist is resolved against the playlist URL and
//! replaced by a proxy URL. Variant rewriting additionally assigns each file a
//! deterministic cache filename and reports the files that should be fetched.

use std::collections::HashSet;

use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist};
use tracing::trace;
use url::Url;

use crate::RewriteError;
use crate::fingerprint::hex_md5;
use crate::resolve::{key_proxy_url, playlist_proxy_url, resolve_reference, segment_proxy_url};

const DEFAULT_SEGMENT_EXT: &str = ".ts";
const DEFAULT_INIT_EXT: &str = ".mp4";
const KEY_EXT: &str = ".key";

/// What a fetch item holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Segment,
    Key,
    /// `EXT-X-MAP` initialization section
    InitSection,
}

impl FetchKind {
    /// Stable name, used as the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segment => "segment",
            Self::Key => "key",
            Self::InitSection => "init",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "segment" => Some(Self::Segment),
            "key" => Some(Self::Key),
            "init" => Some(Self::InitSection),
            _ => None,
        }
    }
}

impl std::fmt::Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single file the rewrite determined must be retrieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchItem {
    /// Resolved absolute source URL
    pub url: String,
    /// Cache-relative filename
    pub filename: String,
    pub kind: FetchKind,
}

/// Result of rewriting a variant (media) playlist.
#[derive(Debug, Clone)]
pub struct VariantRewrite {
    pub content: String,
    pub items: Vec<FetchItem>,
    pub total_segments: usize,
}

/// A parsed playlist of either kind.
#[derive(Debug, Clone)]
pub enum ParsedPlaylist {
    Master(MasterPlaylist),
    Media(MediaPlaylist),
}

impl ParsedPlaylist {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Master(_) => "master",
            Self::Media(_) => "media",
        }
    }
}

/// Parse raw playlist bytes.
pub fn parse_playlist(input: &[u8]) -> Result<ParsedPlaylist, RewriteError> {
    match m3u8_rs::parse_playlist_res(input) {
        Ok(Playlist::MasterPlaylist(pl)) => Ok(ParsedPlaylist::Master(pl)),
        Ok(Playlist::MediaPlaylist(pl)) => Ok(ParsedPlaylist::Media(pl)),
        Err(e) => Err(RewriteError::Parse {
            reason: e.to_string(),
        }),
    }
}

/// Rewrite every variant and rendition reference of a master playlist to the
/// proxy's playlist route. Produces no fetch items: the chosen variant is
/// handled when the player requests its rewritten link.
pub fn rewrite_master(
    mut playlist: MasterPlaylist,
    proxy_base: &str,
    source_base: &Url,
) -> Result<String, RewriteError> {
    for variant in playlist.variants.iter_mut() {
        let resolved = resolve_reference(source_base, &variant.uri);
        variant.uri = playlist_proxy_url(proxy_base, &resolved);
    }

    for alternative in playlist.alternatives.iter_mut() {
        if let Some(uri) = alternative.uri.as_mut()
            && !uri.is_empty()
        {
            let resolved = resolve_reference(source_base, uri);
            *uri = playlist_proxy_url(proxy_base, &resolved);
        }
    }

    let mut out = Vec::new();
    playlist.write_to(&mut out)?;
    String::from_utf8(out).map_err(|_| RewriteError::NonUtf8Output)
}

/// Rewrite a variant playlist for `task_id`.
///
/// Segments are numbered from 1 in playlist order; keys and initialization
/// sections are named after a hash of their URL and reported once per call
/// no matter how many segments share them.
pub fn rewrite_variant(
    mut playlist: MediaPlaylist,
    proxy_base: &str,
    task_id: &str,
    source_base: &Url,
) -> Result<VariantRewrite, RewriteError> {
    let mut items = Vec::new();
    let mut seen_shared: HashSet<String> = HashSet::new();
    let mut total_segments = 0usize;

    for segment in playlist.segments.iter_mut() {
        if !segment.uri.is_empty() {
            total_segments += 1;

            let resolved = resolve_reference(source_base, &segment.uri);
            let filename = segment_filename(total_segments, &resolved);
            segment.uri = segment_proxy_url(proxy_base, task_id, &filename, &resolved);

            items.push(FetchItem {
                url: resolved,
                filename,
                kind: FetchKind::Segment,
            });
        }

        if let Some(key) = segment.key.as_mut()
            && let Some(uri) = key.uri.as_mut()
            && !uri.is_empty()
        {
            let resolved = resolve_reference(source_base, uri);
            let filename = key_filename(&resolved);
            *uri = key_proxy_url(proxy_base, task_id, &filename, &resolved);

            if seen_shared.insert(filename.clone()) {
                items.push(FetchItem {
                    url: resolved,
                    filename,
                    kind: FetchKind::Key,
                });
            }
        }

        if let Some(map) = segment.map.as_mut()
            && !map.uri.is_empty()
        {
            let resolved = resolve_reference(source_base, &map.uri);
            let filename = init_filename(&resolved);
            map.uri = segment_proxy_url(proxy_base, task_id, &filename, &resolved);

            if seen_shared.insert(filename.clone()) {
                items.push(FetchItem {
                    url: resolved,
                    filename,
                    kind: FetchKind::InitSection,
                });
            }
        }
    }

    trace!(
        task_id,
        total_segments,
        items = items.len(),
        "Rewrote variant playlist"
    );

    let mut out = Vec::new();
    playlist.write_to(&mut out)?;
    let content = String::from_utf8(out).map_err(|_| RewriteError::NonUtf8Output)?;

    Ok(VariantRewrite {
        content,
        items,
        total_segments,
    })
}

/// `00001.ts`, `00002.m4s`, ...
pub fn segment_filename(sequence: usize, resolved_url: &str) -> String {
    let ext = path_extension(resolved_url).unwrap_or_else(|| DEFAULT_SEGMENT_EXT.to_string());
    format!("{:05}{}", sequence, ext)
}

/// `{md5(url)}.key`
pub fn key_filename(resolved_url: &str) -> String {
    format!("{}{}", hex_md5(resolved_url), KEY_EXT)
}

fn init_filename(resolved_url: &str) -> String {
    let ext = path_extension(resolved_url).unwrap_or_else(|| DEFAULT_INIT_EXT.to_string());
    format!("{}{}", hex_md5(resolved_url), ext)
}

/// Extension (with the dot) of the last path element, ignoring query and fragment.
///
/// The element is percent-decoded first. Extensions that are not plain ASCII
/// alphanumerics are discarded so the filename stays a single path segment.
fn path_extension(resolved_url: &str) -> Option<String> {
    let parsed = Url::parse(resolved_url).ok()?;
    let path = parsed.path();
    let name = path.rsplit('/').next().unwrap_or(path);
    let name = urlencoding::decode(name).ok()?;
    let ext = &name[name.rfind('.')? + 1..];
    if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{ext}"))
}

/// Resolved URL of the highest-bandwidth (non I-frame) variant.
///
/// Ties keep the variant listed first.
pub fn best_variant_url(master: &MasterPlaylist, source_base: &Url) -> Option<String> {
    master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .reduce(|best, v| if v.bandwidth > best.bandwidth { v } else { best })
        .map(|v| resolve_reference(source_base, &v.uri))
}
