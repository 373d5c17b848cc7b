//! The `CrawlUri` value object and the seed URI collection.
//!
//! A `CrawlUri` is a normalized URI plus its discovery metadata: the depth at
//! which it was found, the URI it was found on, whether it has been processed,
//! and the tags subscribers have attached to it. Identity is the normalized
//! URI string; the queue deduplicates on it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

/// Normalizes a URI for use as a crawl identity.
///
/// `Url` parsing already lowercases the scheme and host and drops default
/// ports; on top of that the fragment is removed and any remaining `.`/`..`
/// path segments are resolved. The function is idempotent.
pub fn normalize_uri(uri: &Url) -> Url {
    let mut normalized = uri.clone();
    normalized.set_fragment(None);

    let path = normalized.path();
    if path.contains("/./")
        || path.contains("/../")
        || path.ends_with("/.")
        || path.ends_with("/..")
        || path.contains("//")
    {
        let resolved = resolve_dot_segments(path);
        normalized.set_path(&resolved);
    }

    normalized
}

/// Resolves `.` and `..` segments and collapses duplicate slashes, keeping a
/// trailing slash so directory-style paths stay distinguishable.
fn resolve_dot_segments(path: &str) -> String {
    let trailing_slash = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut resolved = format!("/{}", segments.join("/"));
    if trailing_slash {
        resolved.push('/');
    }
    resolved
}

/// A discovered URI together with its crawl metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlUri {
    uri: Url,
    level: u32,
    found_on: Option<Url>,
    processed: bool,
    tags: HashSet<String>,
}

impl CrawlUri {
    /// Creates a seed `CrawlUri` at level 0 with no parent.
    pub fn new(uri: Url) -> Self {
        Self::with_parts(uri, 0, false, None)
    }

    /// Creates a `CrawlUri` from its parts. The URI is normalized on entry.
    ///
    /// A `CrawlUri` is at level 0 exactly when it has no parent.
    pub fn with_parts(uri: Url, level: u32, processed: bool, found_on: Option<Url>) -> Self {
        debug_assert_eq!(level == 0, found_on.is_none());
        Self {
            uri: normalize_uri(&uri),
            level,
            processed,
            found_on: found_on.as_ref().map(normalize_uri),
            tags: HashSet::new(),
        }
    }

    /// The normalized URI.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// The normalized URI string, used as identity everywhere.
    pub fn identity(&self) -> &str {
        self.uri.as_str()
    }

    /// Discovery depth: 0 for seeds, 1 for direct children, and so on.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// The URI this one was discovered on, absent for seeds.
    pub fn found_on(&self) -> Option<&Url> {
        self.found_on.as_ref()
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    /// Flips the processed flag. Monotonic: there is no way back to false.
    pub(crate) fn mark_processed(&mut self) {
        self.processed = true;
    }

    /// Attaches a tag. Tags are free-form labels subscribers use to
    /// communicate decisions to each other.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    /// Renders a log message carrying the URI and its level.
    pub fn log_line(&self, message: &str) -> String {
        format!("{} [uri: {}] [level: {}]", message, self.uri, self.level)
    }
}

impl std::fmt::Display for CrawlUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// The seed URIs of a job: a set with stable iteration, deduplicated by
/// normalized identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseUriCollection {
    uris: Vec<Url>,
}

impl BaseUriCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a URI unless an equal normalized URI is already present.
    pub fn push(&mut self, uri: Url) {
        let normalized = normalize_uri(&uri);
        if !self.uris.contains(&normalized) {
            self.uris.push(normalized);
        }
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.uris.contains(&normalize_uri(uri))
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.uris.iter()
    }
}

impl FromIterator<Url> for BaseUriCollection {
    fn from_iter<I: IntoIterator<Item = Url>>(iter: I) -> Self {
        let mut collection = Self::new();
        for uri in iter {
            collection.push(uri);
        }
        collection
    }
}

impl<'a> IntoIterator for &'a BaseUriCollection {
    type Item = &'a Url;
    type IntoIter = std::slice::Iter<'a, Url>;

    fn into_iter(self) -> Self::IntoIter {
        self.uris.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn normalize_lowercases_scheme_and_host() {
        let normalized = normalize_uri(&url("HTTP://EXAMPLE.COM/Page"));
        assert_eq!(normalized.as_str(), "http://example.com/Page");
    }

    #[test]
    fn normalize_strips_default_port() {
        let normalized = normalize_uri(&url("http://example.com:80/a"));
        assert_eq!(normalized.as_str(), "http://example.com/a");
    }

    #[test]
    fn normalize_removes_fragment() {
        let normalized = normalize_uri(&url("http://example.com/page#section"));
        assert_eq!(normalized.as_str(), "http://example.com/page");
    }

    #[test]
    fn normalize_resolves_dot_segments() {
        let normalized = normalize_uri(&url("http://example.com/a/../b/./c"));
        assert_eq!(normalized.as_str(), "http://example.com/b/c");
    }

    #[test]
    fn normalize_keeps_trailing_slash() {
        let normalized = normalize_uri(&url("http://example.com/a/b/"));
        assert_eq!(normalized.as_str(), "http://example.com/a/b/");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_uri(&url("HTTP://EXAMPLE.com:80/x/../y/#frag"));
        let twice = normalize_uri(&once);
        assert_eq!(once, twice);
        assert_eq!(once.as_str(), "http://example.com/y/");
    }

    #[test]
    fn seed_is_level_zero_without_parent() {
        let seed = CrawlUri::new(url("http://example.com/"));
        assert_eq!(seed.level(), 0);
        assert!(seed.found_on().is_none());
        assert!(!seed.is_processed());
    }

    #[test]
    fn tags_are_a_set() {
        let mut uri = CrawlUri::new(url("http://example.com/"));
        uri.add_tag("noindex");
        uri.add_tag("noindex");
        assert!(uri.has_tag("noindex"));
        assert!(!uri.has_tag("nofollow"));
        assert_eq!(uri.tags().len(), 1);
    }

    #[test]
    fn log_line_carries_uri_and_level() {
        let uri = CrawlUri::with_parts(
            url("http://example.com/a"),
            2,
            false,
            Some(url("http://example.com/")),
        );
        let line = uri.log_line("Skipped");
        assert!(line.contains("http://example.com/a"));
        assert!(line.contains("[level: 2]"));
    }

    #[test]
    fn base_uris_deduplicate_by_normalized_identity() {
        let mut seeds = BaseUriCollection::new();
        seeds.push(url("http://example.com/"));
        seeds.push(url("HTTP://EXAMPLE.COM/#top"));
        seeds.push(url("http://example.com/other"));
        assert_eq!(seeds.len(), 2);
        assert!(seeds.contains(&url("http://example.com/")));
    }
}
