//! # File Queue Module
//!
//! A persistent [`Queue`] backend that spools each job to disk.
//!
//! Every job lives in one MessagePack document under the spool directory,
//! written atomically (temporary file + rename) on each mutation so a crash
//! never leaves a half-written job behind. Jobs present on disk are loaded
//! when the queue is opened, which is what makes `Engine::resume` work
//! across process restarts.
//!
//! Like [`MemoryQueue`](crate::queue::MemoryQueue), `get_next` returns
//! unprocessed entries FIFO by first insertion.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::error::QueueError;
use crate::queue::{derive_job_id, JobId, JobRecord, Queue};
use crate::uri::{normalize_uri, BaseUriCollection, CrawlUri};

const JOB_FILE_EXTENSION: &str = "job";

/// MessagePack-on-disk queue backend.
pub struct FileQueue {
    directory: PathBuf,
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl FileQueue {
    /// Opens (and creates if needed) a spool directory, loading every job
    /// found in it. Unreadable job files are skipped with a warning so one
    /// corrupt record cannot take the whole spool down.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, QueueError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let mut jobs = HashMap::new();
        for entry in fs::read_dir(&directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOB_FILE_EXTENSION) {
                continue;
            }

            match Self::load_job(&path) {
                Ok((job_id, record)) => {
                    debug!(
                        source = "queue",
                        job_id = %job_id,
                        entries = record.entries.len(),
                        "loaded job from spool"
                    );
                    jobs.insert(job_id, record);
                }
                Err(e) => warn!(
                    source = "queue",
                    path = %path.display(),
                    "skipping unreadable job file: {e}"
                ),
            }
        }

        Ok(Self {
            directory,
            jobs: RwLock::new(jobs),
        })
    }

    fn load_job(path: &Path) -> Result<(JobId, JobRecord), QueueError> {
        let job_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(JobId::from)
            .ok_or_else(|| QueueError::Decode(format!("bad job file name: {}", path.display())))?;

        let bytes = fs::read(path)?;
        let record = rmp_serde::from_slice(&bytes).map_err(|e| QueueError::Decode(e.to_string()))?;
        Ok((job_id, record))
    }

    fn job_path(&self, job_id: &JobId) -> PathBuf {
        self.directory
            .join(format!("{}.{}", job_id, JOB_FILE_EXTENSION))
    }

    fn persist(&self, job_id: &JobId, record: &JobRecord) -> Result<(), QueueError> {
        let path = self.job_path(job_id);
        let tmp_path = path.with_extension("tmp");

        let encoded = rmp_serde::to_vec(record).map_err(|e| QueueError::Encode(e.to_string()))?;
        fs::write(&tmp_path, encoded)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

#[async_trait]
impl Queue for FileQueue {
    async fn create_job_id(&self, base_uris: &BaseUriCollection) -> Result<JobId, QueueError> {
        let job_id = derive_job_id(base_uris);

        let mut jobs = self.jobs.write();
        if !jobs.contains_key(&job_id) {
            let record = JobRecord::seeded(base_uris);
            self.persist(&job_id, &record)?;
            jobs.insert(job_id.clone(), record);
        }
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
        self.persist(job_id, record)
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
        let path = self.job_path(job_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn spool_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "crawlet-file-queue-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn seeds(uris: &[&str]) -> BaseUriCollection {
        uris.iter().map(|u| url(u)).collect()
    }

    #[tokio::test]
    async fn jobs_survive_reopening_the_spool() {
        let dir = spool_dir("reopen");

        let job_id = {
            let queue = FileQueue::open(&dir).unwrap();
            let job_id = queue.create_job_id(&seeds(&["http://a/"])).await.unwrap();

            let mut seed = queue.get(&job_id, &url("http://a/")).await.unwrap().unwrap();
            seed.mark_processed();
            seed.add_tag("nofollow");
            queue.add(&job_id, seed).await.unwrap();

            let child = CrawlUri::with_parts(url("http://a/x"), 1, false, Some(url("http://a/")));
            queue.add(&job_id, child).await.unwrap();
            job_id
        };

        let reopened = FileQueue::open(&dir).unwrap();
        assert!(reopened.is_job_id_valid(&job_id).await);

        let seed = reopened
            .get(&job_id, &url("http://a/"))
            .await
            .unwrap()
            .unwrap();
        assert!(seed.is_processed());
        assert!(seed.has_tag("nofollow"));

        let next = reopened.get_next(&job_id).await.unwrap().unwrap();
        assert_eq!(next.identity(), "http://a/x");
        assert_eq!(next.level(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn delete_job_removes_the_spool_file() {
        let dir = spool_dir("delete");
        let queue = FileQueue::open(&dir).unwrap();
        let job_id = queue.create_job_id(&seeds(&["http://a/"])).await.unwrap();

        let path = queue.job_path(&job_id);
        assert!(path.exists());

        queue.delete_job(&job_id).await.unwrap();
        assert!(!path.exists());
        assert!(!queue.is_job_id_valid(&job_id).await);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn corrupt_job_files_are_skipped() {
        let dir = spool_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("broken.job"), b"not messagepack").unwrap();

        let queue = FileQueue::open(&dir).unwrap();
        assert!(!queue.is_job_id_valid(&JobId::from("broken")).await);

        let _ = fs::remove_dir_all(&dir);
    }
}
