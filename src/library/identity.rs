//! Identity keys for deduplication.
//!
//! The key is a pure function of the normalized source URL: lowercase scheme
//! and host, no default port, no credentials, no fragment, no trailing slash,
//! query pairs sorted. Nothing known only after extraction (title, artist,
//! wall-clock time) takes part in it.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::core::IngestError;

/// Number of digest bytes kept in the key (128 bits)
const IDENTITY_BYTES: usize = 16;

/// Platforms the extractor is known to handle
const SUPPORTED_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "bilibili.com",
    "b23.tv",
    "music.163.com",
    "y.qq.com",
    "kugou.com",
    "kuwo.cn",
];

/// Deduplication key (hex SHA256(normalized url)[0:16])
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Derive the identity key for a source URL
    pub fn from_url(source_url: &str) -> Result<Self, IngestError> {
        let normalized = normalize_url(source_url)?;
        let digest = Sha256::digest(normalized.as_bytes());
        Ok(Self(hex::encode(&digest[..IDENTITY_BYTES])))
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shorthand for `IdentityKey::from_url`
pub fn identity(source_url: &str) -> Result<IdentityKey, IngestError> {
    IdentityKey::from_url(source_url)
}

/// Canonical string form of a source URL
pub fn normalize_url(source_url: &str) -> Result<String, IngestError> {
    let invalid = |reason: String| IngestError::InvalidUrl {
        url: source_url.to_string(),
        reason,
    };

    let mut url = Url::parse(source_url.trim()).map_err(|e| invalid(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }

    // Setters only fail for cannot-be-a-base URLs, excluded by the scheme check
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

/// Whether the URL points at a platform the extractor is known to handle
pub fn is_supported_source(source_url: &str) -> bool {
    let Ok(url) = Url::parse(source_url.trim()) else {
        return false;
    };

    match url.host_str() {
        Some(host) => {
            let host = host.to_lowercase();
            SUPPORTED_HOSTS
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable_and_url_safe() {
        let a = identity("https://www.youtube.com/watch?v=abc123").unwrap();
        let b = identity("https://www.youtube.com/watch?v=abc123").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), IDENTITY_BYTES * 2);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_normalization_equivalences() {
        let base = identity("https://www.youtube.com/watch?v=abc&t=10").unwrap();

        for variant in [
            "HTTPS://WWW.YouTube.com/watch?t=10&v=abc",
            "https://www.youtube.com:443/watch?v=abc&t=10",
            "https://www.youtube.com/watch?v=abc&t=10#comments",
            "https://user:pw@www.youtube.com/watch?v=abc&t=10",
            "  https://www.youtube.com/watch?v=abc&t=10  ",
        ] {
            assert_eq!(identity(variant).unwrap(), base, "variant {}", variant);
        }
    }

    #[test]
    fn test_distinct_sources_get_distinct_keys() {
        let a = identity("https://youtu.be/abc").unwrap();
        let b = identity("https://youtu.be/abd").unwrap();
        let c = identity("https://youtu.be/abc?list=1").unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        assert_eq!(
            normalize_url("https://www.bilibili.com/video/BV1xx/").unwrap(),
            "https://www.bilibili.com/video/BV1xx"
        );
        assert_eq!(
            normalize_url("https://example.com").unwrap(),
            "https://example.com/"
        );
    }

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(matches!(
            identity("ftp://example.com/a.mp3"),
            Err(IngestError::InvalidUrl { .. })
        ));
        assert!(matches!(
            identity("not a url"),
            Err(IngestError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_supported_sources() {
        assert!(is_supported_source("https://www.youtube.com/watch?v=1"));
        assert!(is_supported_source("https://m.bilibili.com/video/BV1"));
        assert!(is_supported_source("https://b23.tv/xyz"));
        assert!(!is_supported_source("https://notyoutube.com/watch?v=1"));
        assert!(!is_supported_source("https://example.com/song.mp3"));
        assert!(!is_supported_source("garbage"));
    }
}
