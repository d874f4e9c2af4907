use md5::{Digest, Md5};

/// Derive the task identifier for a source playlist URL.
///
/// The URL is hashed exactly as given. Two spellings of the same resource
/// (reordered query parameters, different percent-encoding) produce different
/// identifiers and therefore separate caches.
pub fn fingerprint(url: &str) -> String {
    hex_md5(url)
}

/// Lowercase hex MD5 digest of a string.
pub(crate) fn hex_md5(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable() {
        let url = "https://cdn.example.com/live/index.m3u8";
        assert_eq!(fingerprint(url), "cabd3c4e4e0bc3a012ceaee2fc6a0acd");
        assert_eq!(fingerprint(url), fingerprint(url));
    }

    #[test]
    fn fingerprint_does_not_normalize() {
        let a = fingerprint("https://cdn.example.com/live/index.m3u8?a=1&b=2");
        let b = fingerprint("https://cdn.example.com/live/index.m3u8?b=2&a=1");
        let c = fingerprint("https://cdn.example.com/live/%69ndex.m3u8?a=1&b=2");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fingerprint_is_hex() {
        let id = fingerprint("");
        assert_eq!(id, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
