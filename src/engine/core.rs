//! The `Engine` type: construction, configuration, subscriber registry, and
//! the callbacks subscribers use while a pass is running.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::error::{CrawlError, QueueError};
use crate::queue::{JobId, Queue};
use crate::stats::StatCollector;
use crate::subscriber::{Subscriber, SubscriberSet};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::uri::{normalize_uri, BaseUriCollection, CrawlUri};

use super::dispatch::CrawlPass;

/// Engine parameters, consumed at construction and altered only through the
/// `with_*` combinators on [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Value of the `User-Agent` header on every request.
    pub user_agent: String,
    /// Total requests a single `crawl` pass may start. 0 means unbounded.
    pub max_requests: usize,
    /// Upper bound on concurrently running requests.
    pub concurrency: usize,
    /// Depth at which URIs are no longer requested. 0 means unbounded.
    pub max_depth: u32,
    /// Pause between consecutive request starts. Global, not per-host.
    pub request_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            user_agent: concat!("crawlet/", env!("CARGO_PKG_VERSION")).to_string(),
            max_requests: 0,
            concurrency: num_cpus::get().clamp(1, 16),
            max_depth: 0,
            request_delay: Duration::ZERO,
        }
    }
}

/// The crawl dispatcher. See the [module docs](super) for the loop shape.
#[derive(Clone)]
pub struct Engine {
    queue: Arc<dyn Queue>,
    transport: Arc<dyn HttpTransport>,
    subscribers: SubscriberSet,
    stats: Arc<StatCollector>,
    job_id: JobId,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine for a new job seeded from `base_uris`.
    ///
    /// Passing no transport installs the bundled [`ReqwestTransport`].
    pub async fn create(
        base_uris: BaseUriCollection,
        queue: Arc<dyn Queue>,
        transport: Option<Arc<dyn HttpTransport>>,
    ) -> Result<Self, CrawlError> {
        if base_uris.is_empty() {
            return Err(CrawlError::EmptyBaseUris);
        }

        let job_id = queue.create_job_id(&base_uris).await?;
        debug!(source = "engine", job_id = %job_id, "created crawl job");
        Ok(Self::assemble(job_id, queue, transport))
    }

    /// Resumes an existing job. The queue must already know the id.
    pub async fn resume(
        job_id: JobId,
        queue: Arc<dyn Queue>,
        transport: Option<Arc<dyn HttpTransport>>,
    ) -> Result<Self, CrawlError> {
        if !queue.is_job_id_valid(&job_id).await {
            return Err(CrawlError::InvalidJobId(job_id));
        }

        debug!(source = "engine", job_id = %job_id, "resuming crawl job");
        Ok(Self::assemble(job_id, queue, transport))
    }

    fn assemble(
        job_id: JobId,
        queue: Arc<dyn Queue>,
        transport: Option<Arc<dyn HttpTransport>>,
    ) -> Self {
        Engine {
            queue,
            transport: transport.unwrap_or_else(|| Arc::new(ReqwestTransport::new())),
            subscribers: SubscriberSet::default(),
            stats: Arc::new(StatCollector::new()),
            job_id,
            config: EngineConfig::default(),
        }
    }

    /// Returns an engine with the given user agent, sharing queue,
    /// transport, and subscribers with `self`.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Returns an engine with a request budget per pass. 0 lifts the limit.
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.config.max_requests = max_requests;
        self
    }

    /// Returns an engine with the given concurrency, clamped to at least 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency.max(1);
        self
    }

    /// Returns an engine with a depth limit. 0 lifts the limit.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    /// Returns an engine that pauses between consecutive request starts.
    pub fn with_request_delay(mut self, request_delay: Duration) -> Self {
        self.config.request_delay = request_delay;
        self
    }

    /// Registers a subscriber. Registration order is the dispatch order for
    /// every hook; capability bits are read once, here.
    pub fn add_subscriber<S: Subscriber + 'static>(&mut self, subscriber: S) {
        self.subscribers.push(Arc::new(subscriber));
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    pub fn stats(&self) -> &Arc<StatCollector> {
        &self.stats
    }

    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn subscriber_set(&self) -> &SubscriberSet {
        &self.subscribers
    }

    /// Queues a URI discovered on `found_on`, at one level deeper.
    ///
    /// When an entry with the same normalized identity already exists it is
    /// returned unchanged and nothing is stored: at most one `CrawlUri` per
    /// identity per job.
    pub async fn add_uri_to_queue(
        &self,
        uri: Url,
        found_on: &CrawlUri,
        processed: bool,
    ) -> Result<CrawlUri, QueueError> {
        let normalized = normalize_uri(&uri);
        if let Some(existing) = self.queue.get(&self.job_id, &normalized).await? {
            return Ok(existing);
        }

        let child = CrawlUri::with_parts(
            normalized,
            found_on.level() + 1,
            processed,
            Some(found_on.uri().clone()),
        );
        debug!(source = "engine", "{}", child.log_line("Queued new URI"));
        self.queue.add(&self.job_id, child.clone()).await?;
        self.stats.increment_uris_enqueued();
        Ok(child)
    }

    /// Looks up the stored `CrawlUri` for a (normalized) URI.
    pub async fn get_crawl_uri(&self, uri: &Url) -> Result<Option<CrawlUri>, QueueError> {
        self.queue.get(&self.job_id, uri).await
    }

    /// Runs a crawl pass until the queue is drained of unprocessed entries
    /// or the request budget is spent and every in-flight request resolved.
    ///
    /// Per-request failures never surface here; attach a subscriber with the
    /// error capability or read [`stats`](Self::stats) to observe them. The
    /// returned error covers queue/storage failures only.
    pub async fn crawl(&self) -> Result<(), CrawlError> {
        let requests_sent = CrawlPass::new(self).run().await?;

        debug!(
            source = "engine",
            job_id = %self.job_id,
            requests_sent,
            "finished crawling"
        );

        for entry in self.subscribers.finish_capable() {
            entry.subscriber.finished_crawling(self).await;
        }

        Ok(())
    }
}
