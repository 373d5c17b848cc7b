//! The HTTP transport seam.
//!
//! The engine never talks to an HTTP client directly; it goes through the
//! [`HttpTransport`] trait, which starts streaming GET requests and exposes a
//! drained convenience fetch for auxiliary documents (robots.txt, sitemaps).
//! [`ReqwestTransport`] is the bundled implementation.
//!
//! Connection pooling, TLS, redirects, and timeouts all belong to the client
//! behind the trait; the engine imposes none of its own.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, USER_AGENT};
use url::Url;

use crate::error::TransportError;

/// A GET request about to be issued.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub uri: Url,
    pub user_agent: String,
}

/// The streamed bytes of one response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Resolves once response headers have materialized.
pub type ResponseFuture = BoxFuture<'static, Result<ResponseStream, TransportError>>;

/// A started response: materialized status and headers plus the body stream.
pub struct ResponseStream {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

/// A fully drained auxiliary document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchedDocument {
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Issues HTTP GET requests on behalf of the engine.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Begins a GET request and returns a future resolving when headers
    /// arrive.
    ///
    /// Implementations must issue the request before returning, not on first
    /// poll of the future: the engine's politeness delay paces calls to this
    /// method, and a lazily started request would collapse the gaps.
    fn start(&self, request: TransportRequest) -> ResponseFuture;

    /// Fetches a document and drains its body. Used by policy subscribers
    /// for robots.txt and sitemaps.
    async fn fetch(&self, uri: &Url, user_agent: &str) -> Result<FetchedDocument, TransportError> {
        let response = self
            .start(TransportRequest {
                uri: uri.clone(),
                user_agent: user_agent.to_string(),
            })
            .await?;

        let ResponseStream {
            status,
            headers,
            mut body,
        } = response;

        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        Ok(FetchedDocument {
            status,
            headers,
            body: buffer.freeze(),
        })
    }
}

/// The bundled `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a preconfigured client (custom timeouts, redirect policy, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    fn start(&self, request: TransportRequest) -> ResponseFuture {
        let client = self.client.clone();
        let url_for_join = request.uri.to_string();

        // Spawning makes the request leave immediately; the returned future
        // only joins the in-flight task.
        let handle = tokio::spawn(async move {
            let TransportRequest { uri, user_agent } = request;

            let response = client
                .get(uri.clone())
                .header(USER_AGENT, user_agent)
                .send()
                .await
                .map_err(|e| TransportError::from_request_error(&uri, e))?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response
                .bytes_stream()
                .map_err(move |e| TransportError::from_body_error(&uri, e))
                .boxed();

            Ok(ResponseStream {
                status,
                headers,
                body,
            })
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(TransportError::Connect {
                    url: url_for_join,
                    message: join_error.to_string(),
                }),
            }
        }
        .boxed()
    }
}
