//! URL helpers.

use url::Url;

use crate::{Error, Result};

/// Parse a source playlist URL, accepting only absolute http(s) URLs with a host.
pub fn parse_source_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::validation(format!("Invalid url '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::validation(format!(
                "Only http/https URLs are allowed, got '{other}'"
            )));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation(format!("URL '{raw}' has no host")));
    }
    Ok(url)
}

/// Whether a task id or filename taken from a request path is a single, plain
/// path component.
pub fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains(['/', '\\', '\0'])
        && !component.contains("..")
}
