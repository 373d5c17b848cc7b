//! Response and chunk types handed to subscribers.

use bytes::{Bytes, BytesMut};
use reqwest::header::HeaderMap;
use url::Url;

/// One event in a response's chunk sequence.
///
/// Every response produces a first chunk when its headers materialize,
/// possibly followed by body data, and a final empty chunk once the body is
/// complete. Subscribers only observe the first and the last chunk.
#[derive(Debug, Clone)]
pub struct Chunk {
    data: Bytes,
    is_first: bool,
    is_last: bool,
}

impl Chunk {
    pub(crate) fn first() -> Self {
        Self {
            data: Bytes::new(),
            is_first: true,
            is_last: false,
        }
    }

    pub(crate) fn last() -> Self {
        Self {
            data: Bytes::new(),
            is_first: false,
            is_last: true,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_first(&self) -> bool {
        self.is_first
    }

    pub fn is_last(&self) -> bool {
        self.is_last
    }
}

/// The engine-side view of an in-flight response: materialized status and
/// headers plus the body content accumulated so far.
#[derive(Debug)]
pub struct CrawlResponse {
    uri: Url,
    status: u16,
    headers: HeaderMap,
    content: BytesMut,
}

impl CrawlResponse {
    pub(crate) fn new(uri: Url, status: u16, headers: HeaderMap) -> Self {
        Self {
            uri,
            status,
            headers,
            content: BytesMut::new(),
        }
    }

    pub(crate) fn append(&mut self, data: &[u8]) {
        self.content.extend_from_slice(data);
    }

    /// The URI the request was issued for.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of the named header, when present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body received so far; the full body on the last chunk.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// The body as text, lossily decoded.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_html(&self) -> bool {
        self.content_type()
            .map(|ct| ct.starts_with("text/html"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CONTENT_TYPE};

    fn response_with_content_type(value: &str) -> CrawlResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(value).unwrap());
        CrawlResponse::new(Url::parse("http://a/").unwrap(), 200, headers)
    }

    #[test]
    fn chunk_flags() {
        assert!(Chunk::first().is_first());
        assert!(!Chunk::first().is_last());
        assert!(Chunk::last().is_last());
        assert!(!Chunk::last().is_first());
    }

    #[test]
    fn html_detection_tolerates_charset_parameters() {
        assert!(response_with_content_type("text/html").is_html());
        assert!(response_with_content_type("text/html; charset=utf-8").is_html());
        assert!(!response_with_content_type("application/pdf").is_html());
    }

    #[test]
    fn content_accumulates() {
        let mut response = response_with_content_type("text/html");
        response.append(b"hello ");
        response.append(b"world");
        assert_eq!(response.content(), b"hello world");
        assert_eq!(response.text(), "hello world");
    }
}
