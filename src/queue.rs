//! # Queue Module
//!
//! The durable work queue behind the crawl engine.
//!
//! A queue stores the `CrawlUri` records of one or more jobs, deduplicates
//! them by normalized identity, and hands unprocessed entries back to the
//! engine in first-insertion order. The engine depends only on the [`Queue`]
//! contract; two backends ship with the crate:
//!
//! - [`MemoryQueue`]: transient, for single-process passes and tests.
//! - [`FileQueue`](crate::file_queue::FileQueue): MessagePack-on-disk spool,
//!   for jobs that must survive restarts.
//!
//! Both backends return entries FIFO by first insertion and serialize
//! concurrent upserts per key.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

use crate::error::QueueError;
use crate::uri::{normalize_uri, BaseUriCollection, CrawlUri};

/// Opaque identifier of one crawl job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Storage contract the engine crawls against.
///
/// Entries are keyed by `(job id, normalized URI)`; `add` upserts, which is
/// how the engine persists the processed transition and tag updates.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Creates a new job seeded with a level-0 `CrawlUri` per base URI and
    /// returns its identifier.
    async fn create_job_id(&self, base_uris: &BaseUriCollection) -> Result<JobId, QueueError>;

    async fn is_job_id_valid(&self, job_id: &JobId) -> bool;

    async fn get_base_uris(&self, job_id: &JobId) -> Result<BaseUriCollection, QueueError>;

    /// Looks an entry up by normalized identity.
    async fn get(&self, job_id: &JobId, uri: &Url) -> Result<Option<CrawlUri>, QueueError>;

    /// Upserts an entry by identity.
    async fn add(&self, job_id: &JobId, crawl_uri: CrawlUri) -> Result<(), QueueError>;

    /// Returns an unprocessed entry, FIFO by first insertion, or `None` when
    /// the job is drained.
    async fn get_next(&self, job_id: &JobId) -> Result<Option<CrawlUri>, QueueError>;

    /// Removes the job and all its entries.
    async fn delete_job(&self, job_id: &JobId) -> Result<(), QueueError>;
}

/// Derives a job id from the normalized base URI set.
///
/// The id is stable across restarts, which lets persistent backends find an
/// existing job again. Two jobs created from an identical seed set therefore
/// share one record.
pub(crate) fn derive_job_id(base_uris: &BaseUriCollection) -> JobId {
    let mut uris: Vec<&str> = base_uris.iter().map(Url::as_str).collect();
    uris.sort_unstable();

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for uri in uris {
        uri.hash(&mut hasher);
    }
    JobId::new(format!("{:016x}", hasher.finish()))
}

/// One job's stored state: the frozen seed set plus the entry map with its
/// insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct JobRecord {
    pub(crate) base_uris: BaseUriCollection,
    pub(crate) entries: HashMap<String, CrawlUri>,
    pub(crate) order: Vec<String>,
}

impl JobRecord {
    pub(crate) fn seeded(base_uris: &BaseUriCollection) -> Self {
        let mut record = JobRecord {
            base_uris: base_uris.clone(),
            ..JobRecord::default()
        };
        for uri in base_uris {
            record.upsert(CrawlUri::new(uri.clone()));
        }
        record
    }

    pub(crate) fn upsert(&mut self, crawl_uri: CrawlUri) {
        let identity = crawl_uri.identity().to_string();
        if self.entries.insert(identity.clone(), crawl_uri).is_none() {
            self.order.push(identity);
        }
    }

    pub(crate) fn next_unprocessed(&self) -> Option<CrawlUri> {
        self.order
            .iter()
            .filter_map(|identity| self.entries.get(identity))
            .find(|entry| !entry.is_processed())
            .cloned()
    }
}

/// Transient in-memory queue backend.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn create_job_id(&self, base_uris: &BaseUriCollection) -> Result<JobId, QueueError> {
        let job_id = derive_job_id(base_uris);
        trace!(source = "queue", job_id = %job_id, seeds = base_uris.len(), "creating job");
        self.jobs
            .write()
            .entry(job_id.clone())
            .or_insert_with(|| JobRecord::seeded(base_uris));
        Ok(job_id)
    }

    async fn is_job_id_valid(&self, job_id: &JobId) -> bool {
        self.jobs.read().contains_key(job_id)
    }

    async fn get_base_uris(&self, job_id: &JobId) -> Result<BaseUriCollection, QueueError> {
        self.jobs
            .read()
            .get(job_id)
            .map(|record| record.base_uris.clone())
            .ok_or_else(|| QueueError::UnknownJob(job_id.clone()))
    }

    async fn get(&self, job_id: &JobId, uri: &Url) -> Result<Option<CrawlUri>, QueueError> {
        let identity = normalize_uri(uri);
        self.jobs
            .read()
            .get(job_id)
            .map(|record| record.entries.get(identity.as_str()).cloned())
            .ok_or_else(|| QueueError::UnknownJob(job_id.clone()))
    }

    async fn add(&self, job_id: &JobId, crawl_uri: CrawlUri) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.clone()))?;
        record.upsert(crawl_uri);
        Ok(())
    }

    async fn get_next(&self, job_id: &JobId) -> Result<Option<CrawlUri>, QueueError> {
        self.jobs
            .read()
            .get(job_id)
            .map(JobRecord::next_unprocessed)
            .ok_or_else(|| QueueError::UnknownJob(job_id.clone()))
    }

    async fn delete_job(&self, job_id: &JobId) -> Result<(), QueueError> {
        self.jobs.write().remove(job_id);
        Ok(())
    }
}
