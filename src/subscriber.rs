//! # Subscriber Module
//!
//! The extension contract of the crawl engine.
//!
//! Subscribers are polled at three points in a request's life: before the
//! GET is issued (`should_request`), when response headers materialize
//! (`needs_content`), and after the full body has arrived (`on_last_chunk`).
//! The two decision hooks return a [`Verdict`]; the engine aggregates them
//! as "at least one Positive wins".
//!
//! Optional hooks (error notification and the end-of-crawl callback) are
//! advertised through [`Capabilities`], which the engine caches once at
//! registration time. Hooks run inline on the engine's dispatch task and
//! must not block for long; every hook receives the engine as a borrowed
//! handle for callbacks such as
//! [`add_uri_to_queue`](crate::engine::Engine::add_uri_to_queue).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{HttpError, TransportError};
use crate::response::{Chunk, CrawlResponse};
use crate::uri::CrawlUri;

/// A subscriber's vote on a decision hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Positive,
    Negative,
    Abstain,
}

impl Verdict {
    pub fn is_positive(self) -> bool {
        matches!(self, Verdict::Positive)
    }

    pub fn is_negative(self) -> bool {
        matches!(self, Verdict::Negative)
    }
}

/// The optional hooks a subscriber implements, declared up front so the
/// engine never has to probe types at dispatch time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Receives `on_transport_error` / `on_http_error`.
    pub handles_errors: bool,
    /// Receives `finished_crawling` once per crawl pass.
    pub wants_finished_crawling: bool,
}

impl Capabilities {
    pub const fn none() -> Self {
        Self {
            handles_errors: false,
            wants_finished_crawling: false,
        }
    }

    pub const fn with_error_handling(mut self) -> Self {
        self.handles_errors = true;
        self
    }

    pub const fn with_finished_crawling(mut self) -> Self {
        self.wants_finished_crawling = true;
        self
    }
}

/// A crawl extension. See the module docs for the hook lifecycle.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Which optional hooks this subscriber wants. Read once at
    /// registration.
    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    /// Votes on whether the URI should be requested at all.
    async fn should_request(&self, engine: &Engine, crawl_uri: &mut CrawlUri) -> Verdict;

    /// Votes on whether the response body should be downloaded. Called with
    /// the first chunk, once headers have materialized. Not called when this
    /// subscriber voted Negative on `should_request`.
    async fn needs_content(
        &self,
        engine: &Engine,
        crawl_uri: &mut CrawlUri,
        response: &CrawlResponse,
        chunk: &Chunk,
    ) -> Verdict;

    /// Called with the last chunk once the full body has arrived. Not called
    /// when this subscriber voted Negative on `needs_content`.
    async fn on_last_chunk(
        &self,
        engine: &Engine,
        crawl_uri: &mut CrawlUri,
        response: &CrawlResponse,
        chunk: &Chunk,
    );

    /// Network-level failure for a request this pass issued. Only called on
    /// subscribers advertising `handles_errors`. The response is present
    /// when headers had already materialized.
    async fn on_transport_error(
        &self,
        engine: &Engine,
        crawl_uri: &mut CrawlUri,
        error: &TransportError,
        response: Option<&CrawlResponse>,
    ) {
        let _ = (engine, crawl_uri, error, response);
    }

    /// HTTP-level failure (non-2xx status). Only called on subscribers
    /// advertising `handles_errors`; the request is already finished when
    /// this runs.
    async fn on_http_error(
        &self,
        engine: &Engine,
        crawl_uri: &mut CrawlUri,
        error: &HttpError,
        response: &CrawlResponse,
        chunk: &Chunk,
    ) {
        let _ = (engine, crawl_uri, error, response, chunk);
    }

    /// Called exactly once per crawl pass, after every per-URI hook has
    /// returned. Only called on subscribers advertising
    /// `wants_finished_crawling`.
    async fn finished_crawling(&self, engine: &Engine) {
        let _ = engine;
    }
}

/// One registered subscriber with its cached capability bits.
#[derive(Clone)]
pub(crate) struct SubscriberEntry {
    pub(crate) subscriber: Arc<dyn Subscriber>,
    pub(crate) capabilities: Capabilities,
}

/// The ordered subscriber registry. Registration order is the dispatch
/// order for every hook.
#[derive(Clone, Default)]
pub(crate) struct SubscriberSet {
    entries: Vec<SubscriberEntry>,
}

impl SubscriberSet {
    pub(crate) fn push(&mut self, subscriber: Arc<dyn Subscriber>) {
        let capabilities = subscriber.capabilities();
        debug!(
            source = "engine",
            subscriber = subscriber.name(),
            handles_errors = capabilities.handles_errors,
            wants_finished_crawling = capabilities.wants_finished_crawling,
            "registered subscriber"
        );
        self.entries.push(SubscriberEntry {
            subscriber,
            capabilities,
        });
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &SubscriberEntry)> {
        self.entries.iter().enumerate()
    }

    pub(crate) fn error_handlers(&self) -> impl Iterator<Item = &SubscriberEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.capabilities.handles_errors)
    }

    pub(crate) fn finish_capable(&self) -> impl Iterator<Item = &SubscriberEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.capabilities.wants_finished_crawling)
    }
}
