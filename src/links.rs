//! # Links Module
//!
//! The bundled link-discovery subscriber.
//!
//! `LinksSubscriber` is the driving vote of a typical crawl: it requests
//! every queued URI that is not disallowed by robots.txt, asks for the body
//! of HTML responses, and queues every `a[href]` link it finds, resolved
//! against the page (honoring a `<base href>` when present).

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::engine::Engine;
use crate::response::{Chunk, CrawlResponse};
use crate::robots::TAG_DISALLOWED_ROBOTS_TXT;
use crate::subscriber::{Subscriber, Verdict};
use crate::uri::CrawlUri;

/// Follows HTML links, respecting the robots disallow tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinksSubscriber;

impl LinksSubscriber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscriber for LinksSubscriber {
    fn name(&self) -> &'static str {
        "links"
    }

    async fn should_request(&self, _engine: &Engine, crawl_uri: &mut CrawlUri) -> Verdict {
        if crawl_uri.has_tag(TAG_DISALLOWED_ROBOTS_TXT) {
            return Verdict::Negative;
        }
        Verdict::Positive
    }

    async fn needs_content(
        &self,
        _engine: &Engine,
        _crawl_uri: &mut CrawlUri,
        response: &CrawlResponse,
        _chunk: &Chunk,
    ) -> Verdict {
        if response.is_html() {
            Verdict::Positive
        } else {
            Verdict::Abstain
        }
    }

    async fn on_last_chunk(
        &self,
        engine: &Engine,
        crawl_uri: &mut CrawlUri,
        response: &CrawlResponse,
        _chunk: &Chunk,
    ) {
        let links = extract_links(&response.text(), response.uri());
        if links.is_empty() {
            return;
        }

        debug!(
            source = "links",
            "{}",
            crawl_uri.log_line(&format!("Found {} links", links.len()))
        );

        for link in links {
            if let Err(e) = engine.add_uri_to_queue(link, crawl_uri, false).await {
                debug!(source = "links", "could not queue discovered link: {e}");
            }
        }
    }
}

/// Extracts the absolute `http`/`https` targets of every `a[href]` element,
/// resolved against `<base href>` when the document declares one and the
/// page URL otherwise.
fn extract_links(html: &str, page_uri: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);

    let base_selector = Selector::parse("base[href]").unwrap();
    let base = document
        .select(&base_selector)
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| page_uri.join(href).ok())
        .unwrap_or_else(|| page_uri.clone());

    let anchor_selector = Selector::parse("a[href]").unwrap();
    document
        .select(&anchor_selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter(|uri| matches!(uri.scheme(), "http" | "https"))
        .collect()
}
