//! # Statistics Module
//!
//! Collects counters about the engine's operation.
//!
//! The `StatCollector` tracks what the dispatch loop does: requests sent and
//! skipped, responses completed, transfers canceled at `needs_content`
//! arbitration, per-request failures, enqueued URIs, bytes received, and the
//! status-code distribution. All counters are atomic, so the collector can
//! be read live from outside the crawl.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

// A consistent snapshot used by the presentation methods.
struct StatsSnapshot {
    requests_sent: usize,
    requests_skipped: usize,
    responses_completed: usize,
    transfers_canceled: usize,
    transport_errors: usize,
    http_errors: usize,
    uris_enqueued: usize,
    total_bytes_received: usize,
    response_status_counts: HashMap<u16, usize>,
    elapsed_duration: Duration,
}

impl StatsSnapshot {
    fn requests_per_second(&self) -> f64 {
        let total_seconds = self.elapsed_duration.as_secs();
        if total_seconds > 0 {
            self.requests_sent as f64 / total_seconds as f64
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;

        if self.total_bytes_received >= MB {
            format!("{:.2} MB", self.total_bytes_received as f64 / MB as f64)
        } else if self.total_bytes_received >= KB {
            format!("{:.2} KB", self.total_bytes_received as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes_received)
        }
    }
}

/// Collects and stores statistics about the engine's operation.
#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    start_time: Instant,

    pub requests_sent: AtomicUsize,
    pub requests_skipped: AtomicUsize,
    pub responses_completed: AtomicUsize,
    pub transfers_canceled: AtomicUsize,
    pub transport_errors: AtomicUsize,
    pub http_errors: AtomicUsize,
    pub uris_enqueued: AtomicUsize,
    pub total_bytes_received: AtomicUsize,
    pub response_status_counts: Arc<dashmap::DashMap<u16, usize>>,
}

impl StatCollector {
    pub(crate) fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_sent: AtomicUsize::new(0),
            requests_skipped: AtomicUsize::new(0),
            responses_completed: AtomicUsize::new(0),
            transfers_canceled: AtomicUsize::new(0),
            transport_errors: AtomicUsize::new(0),
            http_errors: AtomicUsize::new(0),
            uris_enqueued: AtomicUsize::new(0),
            total_bytes_received: AtomicUsize::new(0),
            response_status_counts: Arc::new(dashmap::DashMap::new()),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let mut status_counts: HashMap<u16, usize> = HashMap::new();
        for entry in self.response_status_counts.iter() {
            let (key, value) = entry.pair();
            status_counts.insert(*key, *value);
        }

        StatsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::SeqCst),
            requests_skipped: self.requests_skipped.load(Ordering::SeqCst),
            responses_completed: self.responses_completed.load(Ordering::SeqCst),
            transfers_canceled: self.transfers_canceled.load(Ordering::SeqCst),
            transport_errors: self.transport_errors.load(Ordering::SeqCst),
            http_errors: self.http_errors.load(Ordering::SeqCst),
            uris_enqueued: self.uris_enqueued.load(Ordering::SeqCst),
            total_bytes_received: self.total_bytes_received.load(Ordering::SeqCst),
            response_status_counts: status_counts,
            elapsed_duration: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_skipped(&self) {
        self.requests_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_responses_completed(&self) {
        self.responses_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_transfers_canceled(&self) {
        self.transfers_canceled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_transport_errors(&self) {
        self.transport_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_http_errors(&self) {
        self.http_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_uris_enqueued(&self) {
        self.uris_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_response_status(&self, status_code: u16) {
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
    }

    pub(crate) fn add_bytes_received(&self, bytes: usize) {
        self.total_bytes_received.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Serializes the counters to a JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serializes the counters to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {:?}", snapshot.elapsed_duration)?;
        writeln!(f, "  speed    : {:.2} req/s", snapshot.requests_per_second())?;
        writeln!(
            f,
            "  requests : sent: {}, skipped: {}",
            snapshot.requests_sent, snapshot.requests_skipped
        )?;
        writeln!(
            f,
            "  response : completed: {}, canceled: {}, received: {}",
            snapshot.responses_completed,
            snapshot.transfers_canceled,
            snapshot.formatted_bytes()
        )?;
        writeln!(
            f,
            "  failures : transport: {}, http: {}",
            snapshot.transport_errors, snapshot.http_errors
        )?;
        writeln!(f, "  enqueued : {}", snapshot.uris_enqueued)?;

        let status_string = if snapshot.response_status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot
                .response_status_counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  status   : {}\n", status_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StatCollector::new();
        stats.increment_requests_sent();
        stats.increment_requests_sent();
        stats.record_response_status(200);
        stats.record_response_status(200);
        stats.record_response_status(404);
        stats.add_bytes_received(512);

        assert_eq!(stats.requests_sent.load(Ordering::SeqCst), 2);
        assert_eq!(*stats.response_status_counts.get(&200).unwrap(), 2);
        assert_eq!(*stats.response_status_counts.get(&404).unwrap(), 1);
        assert_eq!(stats.total_bytes_received.load(Ordering::SeqCst), 512);
    }

    #[test]
    fn display_and_json_render() {
        let stats = StatCollector::new();
        stats.increment_requests_sent();
        let rendered = format!("{}", stats);
        assert!(rendered.contains("sent: 1"));
        assert!(stats.to_json_string().is_ok());
    }
}
