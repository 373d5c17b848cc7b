//! Per-pass memoization of subscriber verdicts.
//!
//! Verdicts are keyed by `(interned uri id, subscriber index)` per hook,
//! which keeps keys small, collision-free, and bounded by the pass itself.
//! A lookup miss means the subscriber was never polled and reads as Abstain.
//! The cache lives for a single crawl pass and is never persisted.

use std::collections::HashMap;

use crate::subscriber::Verdict;
use crate::uri::CrawlUri;

type Key = (usize, usize);

#[derive(Debug, Default)]
pub(crate) struct DecisionCache {
    uri_ids: HashMap<String, usize>,
    should_request: HashMap<Key, Verdict>,
    needs_content: HashMap<Key, Verdict>,
}

impl DecisionCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Interns the URI identity, handing out dense ids in first-seen order.
    pub(crate) fn uri_id(&mut self, crawl_uri: &CrawlUri) -> usize {
        let next_id = self.uri_ids.len();
        *self
            .uri_ids
            .entry(crawl_uri.identity().to_string())
            .or_insert(next_id)
    }

    pub(crate) fn record_should_request(
        &mut self,
        uri_id: usize,
        subscriber_index: usize,
        verdict: Verdict,
    ) {
        self.should_request
            .insert((uri_id, subscriber_index), verdict);
    }

    pub(crate) fn should_request(&self, uri_id: usize, subscriber_index: usize) -> Verdict {
        self.should_request
            .get(&(uri_id, subscriber_index))
            .copied()
            .unwrap_or(Verdict::Abstain)
    }

    pub(crate) fn was_should_request_polled(&self, uri_id: usize, subscriber_index: usize) -> bool {
        self.should_request
            .contains_key(&(uri_id, subscriber_index))
    }

    pub(crate) fn record_needs_content(
        &mut self,
        uri_id: usize,
        subscriber_index: usize,
        verdict: Verdict,
    ) {
        self.needs_content
            .insert((uri_id, subscriber_index), verdict);
    }

    pub(crate) fn needs_content(&self, uri_id: usize, subscriber_index: usize) -> Verdict {
        self.needs_content
            .get(&(uri_id, subscriber_index))
            .copied()
            .unwrap_or(Verdict::Abstain)
    }
}
