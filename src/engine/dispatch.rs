//! The per-pass dispatch state machine: prepare phase, stream-phase
//! multiplexer, and the per-request error path.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tracing::debug;

use crate::decision::DecisionCache;
use crate::error::{CrawlError, HttpError, TransportError};
use crate::queue::Queue;
use crate::response::{Chunk, CrawlResponse};
use crate::subscriber::Subscriber;
use crate::transport::{BodyStream, HttpTransport, ResponseStream, TransportRequest};
use crate::uri::CrawlUri;

use super::core::Engine;

/// One event from the multiplexed in-flight responses: either headers
/// materialized (or failed to), or the body stream produced its next item.
enum StreamEvent {
    Headers(u64, Result<ResponseStream, TransportError>),
    Body(u64, BodyStream, Option<Result<Bytes, TransportError>>),
}

/// Engine-side state of one in-flight request. The `CrawlUri` rides along
/// here so every chunk event can be attributed without a queue lookup.
struct InFlight {
    crawl_uri: CrawlUri,
    uri_id: usize,
    response: Option<CrawlResponse>,
}

/// State of a single `crawl()` invocation. Everything in here lives on the
/// dispatch task; nothing needs a lock.
pub(crate) struct CrawlPass<'e> {
    engine: &'e Engine,
    decisions: DecisionCache,
    running: HashSet<String>,
    in_flight: HashMap<u64, InFlight>,
    events: FuturesUnordered<BoxFuture<'static, StreamEvent>>,
    requests_sent: usize,
    next_key: u64,
}

impl<'e> CrawlPass<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        CrawlPass {
            engine,
            decisions: DecisionCache::new(),
            running: HashSet::new(),
            in_flight: HashMap::new(),
            events: FuturesUnordered::new(),
            requests_sent: 0,
            next_key: 0,
        }
    }

    /// Runs the pass to completion and returns the number of requests sent.
    pub(crate) async fn run(mut self) -> Result<usize, CrawlError> {
        loop {
            self.fill().await?;

            if self.events.is_empty() {
                break;
            }

            if let Some(event) = self.events.next().await {
                self.handle_event(event).await?;
            }
        }

        Ok(self.requests_sent)
    }

    /// Prepare phase: pop queue entries and start requests until the
    /// concurrency limit, the request budget, or the queue end is hit.
    async fn fill(&mut self) -> Result<(), CrawlError> {
        let concurrency = self.engine.config().concurrency.max(1);

        while self.running.len() < concurrency && !self.max_requests_reached() {
            let next = self
                .engine
                .queue()
                .get_next(self.engine.job_id())
                .await?;

            match next {
                Some(crawl_uri) => self.prepare(crawl_uri).await?,
                None => break,
            }
        }

        Ok(())
    }

    fn max_requests_reached(&self) -> bool {
        let max_requests = self.engine.config().max_requests;
        max_requests != 0 && self.requests_sent >= max_requests
    }

    /// Gates one queue entry and, when the subscribers want it, starts the
    /// request.
    async fn prepare(&mut self, mut crawl_uri: CrawlUri) -> Result<(), CrawlError> {
        let engine = self.engine;

        if crawl_uri.is_processed() {
            return Ok(());
        }

        // The processed transition is persisted before anything else so a
        // resumed job never re-requests this URI.
        crawl_uri.mark_processed();
        engine
            .queue()
            .add(engine.job_id(), crawl_uri.clone())
            .await?;

        // An identical URI already in flight must not be counted twice.
        if self.running.contains(crawl_uri.identity()) {
            return Ok(());
        }

        let scheme = crawl_uri.uri().scheme();
        if scheme != "http" && scheme != "https" {
            debug!(
                source = "engine",
                "{}",
                crawl_uri.log_line("Skipped, unsupported scheme")
            );
            engine.stats().increment_requests_skipped();
            return Ok(());
        }

        let max_depth = engine.config().max_depth;
        if max_depth != 0 && crawl_uri.level() >= max_depth {
            debug!(
                source = "engine",
                "{}",
                crawl_uri.log_line("Skipped, max depth reached")
            );
            engine.stats().increment_requests_skipped();
            return Ok(());
        }

        let uri_id = self.decisions.uri_id(&crawl_uri);
        let mut any_positive = false;
        for (index, entry) in engine.subscriber_set().iter() {
            if self.decisions.was_should_request_polled(uri_id, index) {
                any_positive |= self.decisions.should_request(uri_id, index).is_positive();
                continue;
            }

            let verdict = entry
                .subscriber
                .should_request(engine, &mut crawl_uri)
                .await;
            self.decisions.record_should_request(uri_id, index, verdict);
            any_positive |= verdict.is_positive();
        }

        // Persist tags attached during arbitration.
        engine
            .queue()
            .add(engine.job_id(), crawl_uri.clone())
            .await?;

        if !any_positive {
            debug!(
                source = "engine",
                "{}",
                crawl_uri.log_line("Skipped, no subscriber requested the URI")
            );
            engine.stats().increment_requests_skipped();
            return Ok(());
        }

        let request_delay = engine.config().request_delay;
        if !request_delay.is_zero() {
            tokio::time::sleep(request_delay).await;
        }

        self.start_request(crawl_uri, uri_id);
        Ok(())
    }

    /// Starts the GET. The request counts as sent from here on, whatever the
    /// transport makes of it.
    fn start_request(&mut self, crawl_uri: CrawlUri, uri_id: usize) {
        let engine = self.engine;
        let key = self.next_key;
        self.next_key += 1;

        debug!(source = "engine", "{}", crawl_uri.log_line("Sending request"));
        self.requests_sent += 1;
        engine.stats().increment_requests_sent();
        self.running.insert(crawl_uri.identity().to_string());

        let response_future = engine.transport().start(TransportRequest {
            uri: crawl_uri.uri().clone(),
            user_agent: engine.user_agent().to_string(),
        });

        self.in_flight.insert(
            key,
            InFlight {
                crawl_uri,
                uri_id,
                response: None,
            },
        );
        self.events
            .push(async move { StreamEvent::Headers(key, response_future.await) }.boxed());
    }

    async fn handle_event(&mut self, event: StreamEvent) -> Result<(), CrawlError> {
        match event {
            StreamEvent::Headers(key, Ok(response_stream)) => {
                self.on_headers(key, response_stream).await
            }
            StreamEvent::Headers(key, Err(error)) => self.on_transport_error(key, error).await,
            StreamEvent::Body(key, body, Some(Ok(data))) => {
                self.on_data(key, body, data);
                Ok(())
            }
            StreamEvent::Body(key, _body, Some(Err(error))) => {
                self.on_transport_error(key, error).await
            }
            StreamEvent::Body(key, _body, None) => self.on_last_chunk(key).await,
        }
    }

    /// First chunk: headers materialized. Surfaces HTTP-level errors, then
    /// runs `needs_content` arbitration and either cancels the transfer or
    /// starts reading the body.
    async fn on_headers(
        &mut self,
        key: u64,
        response_stream: ResponseStream,
    ) -> Result<(), CrawlError> {
        let engine = self.engine;
        let Some(mut inflight) = self.in_flight.remove(&key) else {
            return Ok(());
        };

        let ResponseStream {
            status,
            headers,
            body,
        } = response_stream;
        engine.stats().record_response_status(status);

        let response = CrawlResponse::new(inflight.crawl_uri.uri().clone(), status, headers);
        let chunk = Chunk::first();

        if !(200..300).contains(&status) {
            // Finish before notifying so subscribers observe a settled
            // request; dropping the body releases the transport.
            drop(body);
            self.finish(&inflight.crawl_uri);

            let error = HttpError {
                status,
                url: inflight.crawl_uri.identity().to_string(),
            };
            debug!(
                source = "engine",
                "{}",
                inflight.crawl_uri.log_line(&format!("HTTP error: {error}"))
            );
            engine.stats().increment_http_errors();

            for entry in engine.subscriber_set().error_handlers() {
                entry
                    .subscriber
                    .on_http_error(engine, &mut inflight.crawl_uri, &error, &response, &chunk)
                    .await;
            }

            engine
                .queue()
                .add(engine.job_id(), inflight.crawl_uri.clone())
                .await?;
            return Ok(());
        }

        let mut any_positive = false;
        for (index, entry) in engine.subscriber_set().iter() {
            if self
                .decisions
                .should_request(inflight.uri_id, index)
                .is_negative()
            {
                continue;
            }

            let verdict = entry
                .subscriber
                .needs_content(engine, &mut inflight.crawl_uri, &response, &chunk)
                .await;
            self.decisions
                .record_needs_content(inflight.uri_id, index, verdict);
            any_positive |= verdict.is_positive();
        }

        engine
            .queue()
            .add(engine.job_id(), inflight.crawl_uri.clone())
            .await?;

        if !any_positive {
            debug!(
                source = "engine",
                "{}",
                inflight
                    .crawl_uri
                    .log_line("Canceled transfer, no subscriber needs the content")
            );
            engine.stats().increment_transfers_canceled();
            drop(body);
            self.finish(&inflight.crawl_uri);
            return Ok(());
        }

        inflight.response = Some(response);
        self.in_flight.insert(key, inflight);
        self.push_body_event(key, body);
        Ok(())
    }

    /// Intermediate chunk: accumulate and keep reading. Subscribers only see
    /// the first and the last chunk.
    fn on_data(&mut self, key: u64, body: BodyStream, data: Bytes) {
        match self.in_flight.get_mut(&key) {
            Some(inflight) => {
                if let Some(response) = inflight.response.as_mut() {
                    response.append(&data);
                }
            }
            None => return,
        }

        self.engine.stats().add_bytes_received(data.len());
        self.push_body_event(key, body);
    }

    /// Last chunk: the body is complete. Dispatches `on_last_chunk` to every
    /// subscriber that did not vote Negative on `needs_content`.
    async fn on_last_chunk(&mut self, key: u64) -> Result<(), CrawlError> {
        let engine = self.engine;
        let Some(mut inflight) = self.in_flight.remove(&key) else {
            return Ok(());
        };
        let Some(response) = inflight.response.take() else {
            return Ok(());
        };

        let chunk = Chunk::last();
        for (index, entry) in engine.subscriber_set().iter() {
            if self
                .decisions
                .needs_content(inflight.uri_id, index)
                .is_negative()
            {
                continue;
            }

            entry
                .subscriber
                .on_last_chunk(engine, &mut inflight.crawl_uri, &response, &chunk)
                .await;
        }

        self.finish(&inflight.crawl_uri);
        engine.stats().increment_responses_completed();
        engine
            .queue()
            .add(engine.job_id(), inflight.crawl_uri.clone())
            .await?;
        Ok(())
    }

    /// Network-level failure, at start or mid-stream. Notifies error-capable
    /// subscribers, then finishes the request; the rest of the pass goes on.
    async fn on_transport_error(
        &mut self,
        key: u64,
        error: TransportError,
    ) -> Result<(), CrawlError> {
        let engine = self.engine;
        let Some(mut inflight) = self.in_flight.remove(&key) else {
            return Ok(());
        };

        debug!(
            source = "engine",
            "{}",
            inflight
                .crawl_uri
                .log_line(&format!("Transport error: {error}"))
        );
        engine.stats().increment_transport_errors();

        let response = inflight.response.take();
        for entry in engine.subscriber_set().error_handlers() {
            entry
                .subscriber
                .on_transport_error(engine, &mut inflight.crawl_uri, &error, response.as_ref())
                .await;
        }

        self.finish(&inflight.crawl_uri);
        engine
            .queue()
            .add(engine.job_id(), inflight.crawl_uri.clone())
            .await?;
        Ok(())
    }

    fn push_body_event(&mut self, key: u64, mut body: BodyStream) {
        self.events.push(
            async move {
                let item = body.next().await;
                StreamEvent::Body(key, body, item)
            }
            .boxed(),
        );
    }

    fn finish(&mut self, crawl_uri: &CrawlUri) {
        self.running.remove(crawl_uri.identity());
    }
}
