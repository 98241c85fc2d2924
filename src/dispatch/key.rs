//! Resource keys
//!
//! A resource key is the normalized absolute upstream URL. It is both the
//! identity of the cached log and the routing key that selects an actor.

use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{Error, Result};

/// Canonical upstream URL identifying one resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Normalize an absolute URL into a key
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidTarget(format!("{url}: {e}")))?;
        Self::from_url(parsed)
    }

    fn from_url(url: Url) -> Result<Self> {
        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(Self(url.to_string())),
            _ => Err(Error::InvalidTarget(format!("{url}: missing host"))),
        }
    }

    /// Rebuild the upstream URL from a proxied request path
    ///
    /// The first path segment is the URL-decoded upstream host (optionally
    /// with a port); the remaining segments form the upstream path. Empty
    /// segments are dropped and the query string is kept as-is.
    ///
    /// ```text
    /// /example.com/v1/chat?stream=1  ->  https://example.com/v1/chat?stream=1
    /// /localhost%3A8080/data         ->  https://localhost:8080/data
    /// ```
    pub fn from_proxy_path(scheme: &str, path: &str, query: Option<&str>) -> Result<Self> {
        let mut segments = path.split('/').filter(|segment| !segment.is_empty());

        let host = match segments.next() {
            Some(raw) => percent_decode_str(raw)
                .decode_utf8()
                .map_err(|e| Error::InvalidTarget(format!("host segment {raw:?}: {e}")))?
                .into_owned(),
            None => return Err(Error::InvalidTarget("missing host in path".to_string())),
        };
        if host.contains(['/', '?', '#', '@']) {
            return Err(Error::InvalidTarget(format!("invalid host {host:?}")));
        }

        let rest: Vec<&str> = segments.collect();
        let mut url = Url::parse(&format!("{scheme}://{host}/{}", rest.join("/")))
            .map_err(|e| Error::InvalidTarget(format!("{host}: {e}")))?;
        url.set_query(query.filter(|q| !q.is_empty()));

        Self::from_url(url)
    }

    /// The key as a URL string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host and, if explicit, port of the upstream
    pub fn authority(&self) -> String {
        match Url::parse(&self.0) {
            Ok(url) => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                (None, _) => String::new(),
            },
            Err(_) => String::new(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        let key = ResourceKey::parse("HTTPS://Example.COM/data").unwrap();
        assert_eq!(key.as_str(), "https://example.com/data");

        let bare = ResourceKey::parse("https://example.com").unwrap();
        assert_eq!(bare.as_str(), "https://example.com/");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            ResourceKey::parse("not a url"),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            ResourceKey::parse("mailto:someone@example.com"),
            Err(Error::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_from_proxy_path() {
        let key = ResourceKey::from_proxy_path("https", "/example.com/data", None).unwrap();
        assert_eq!(key.as_str(), "https://example.com/data");

        let key =
            ResourceKey::from_proxy_path("https", "/api.example.com/v1/chat", Some("stream=1&n=3"))
                .unwrap();
        assert_eq!(key.as_str(), "https://api.example.com/v1/chat?stream=1&n=3");
    }

    #[test]
    fn test_from_proxy_path_matches_admin_key() {
        let proxied = ResourceKey::from_proxy_path("https", "/example.com/data", None).unwrap();
        let admin = ResourceKey::parse("https://example.com/data").unwrap();
        assert_eq!(proxied, admin);
    }

    #[test]
    fn test_from_proxy_path_decodes_host() {
        let key = ResourceKey::from_proxy_path("http", "/localhost%3A8080/x", None).unwrap();
        assert_eq!(key.as_str(), "http://localhost:8080/x");
        assert_eq!(key.authority(), "localhost:8080");
    }

    #[test]
    fn test_from_proxy_path_drops_empty_segments() {
        let key = ResourceKey::from_proxy_path("https", "//example.com//a//b/", None).unwrap();
        assert_eq!(key.as_str(), "https://example.com/a/b");

        let root = ResourceKey::from_proxy_path("https", "/example.com", None).unwrap();
        assert_eq!(root.as_str(), "https://example.com/");
    }

    #[test]
    fn test_from_proxy_path_missing_host() {
        assert!(matches!(
            ResourceKey::from_proxy_path("https", "/", None),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            ResourceKey::from_proxy_path("https", "", None),
            Err(Error::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_from_proxy_path_rejects_smuggled_authority() {
        assert!(ResourceKey::from_proxy_path("https", "/evil.com%40example.com/x", None).is_err());
    }

    #[test]
    fn test_different_paths_are_different_keys() {
        let a = ResourceKey::from_proxy_path("https", "/example.com/a", None).unwrap();
        let b = ResourceKey::from_proxy_path("https", "/example.com/b", None).unwrap();
        let q = ResourceKey::from_proxy_path("https", "/example.com/a", Some("v=2")).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, q);
    }

    #[test]
    fn test_display() {
        let key = ResourceKey::parse("https://example.com/data?x=1").unwrap();
        assert_eq!(key.to_string(), "https://example.com/data?x=1");
        assert_eq!(key.authority(), "example.com");
    }
}
