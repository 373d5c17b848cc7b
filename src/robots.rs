//! # Robots Module
//!
//! The bundled robots policy subscriber.
//!
//! `RobotsSubscriber` enforces three policies without ever blocking a
//! request itself:
//!
//! - **robots.txt disallow**: URIs a site's robots.txt forbids for the
//!   configured user agent are tagged [`TAG_DISALLOWED_ROBOTS_TXT`].
//! - **Sitemap discovery**: when a seed URI is processed, the `Sitemap:`
//!   directives of its robots.txt are fetched and every `<url><loc>` entry
//!   is queued, anchored on a synthetic robots.txt parent.
//! - **noindex / nofollow**: the `X-Robots-Tag` header and
//!   `<meta name="robots">` element add [`TAG_NOINDEX`] / [`TAG_NOFOLLOW`].
//!
//! Every hook returns Abstain: translating tags into Negative verdicts is
//! the job of collaborating subscribers such as
//! [`LinksSubscriber`](crate::links::LinksSubscriber).
//!
//! robots.txt documents are fetched once per origin and cached for the
//! lifetime of the subscriber; a non-200 answer or a transport failure is
//! treated as "no robots.txt at all", which allows everything.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};
use texting_robots::Robot;
use tracing::debug;
use url::Url;

use crate::engine::Engine;
use crate::response::{Chunk, CrawlResponse};
use crate::subscriber::{Subscriber, Verdict};
use crate::transport::HttpTransport;
use crate::uri::CrawlUri;

/// Tag for URIs a robots.txt disallows for the engine's user agent.
pub const TAG_DISALLOWED_ROBOTS_TXT: &str = "disallowed-robots-txt";
/// Tag for responses marked `noindex`.
pub const TAG_NOINDEX: &str = "noindex";
/// Tag for responses marked `nofollow`.
pub const TAG_NOFOLLOW: &str = "nofollow";

/// The bundled robots.txt / sitemap / meta-robots policy subscriber.
#[derive(Debug, Default)]
pub struct RobotsSubscriber {
    // Raw robots.txt text per origin; None records "nothing there". The
    // parsed form is rebuilt per check because `Robot` is not `Clone`.
    origins: Mutex<HashMap<String, Option<String>>>,
}

impl RobotsSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// The robots.txt location for a URI's origin: path `/robots.txt`, no
    /// query, no fragment.
    fn robots_txt_uri(uri: &Url) -> Option<Url> {
        uri.join("/robots.txt").ok()
    }

    /// Returns the cached robots.txt for the URI's origin, fetching it on
    /// first use.
    async fn robots_txt_for(&self, engine: &Engine, uri: &Url) -> Option<String> {
        let origin = uri.origin().ascii_serialization();

        if let Some(cached) = self.origins.lock().get(&origin) {
            return cached.clone();
        }

        let robots_uri = Self::robots_txt_uri(uri)?;
        let fetched = match engine
            .transport()
            .fetch(&robots_uri, engine.user_agent())
            .await
        {
            Ok(document) if document.status == 200 => {
                debug!(source = "robots", uri = %robots_uri, "loaded robots.txt");
                Some(document.text().into_owned())
            }
            Ok(document) => {
                debug!(
                    source = "robots",
                    uri = %robots_uri,
                    status = document.status,
                    "no usable robots.txt, allowing everything"
                );
                None
            }
            Err(e) => {
                debug!(
                    source = "robots",
                    uri = %robots_uri,
                    "robots.txt fetch failed, allowing everything: {e}"
                );
                None
            }
        };

        self.origins.lock().insert(origin, fetched.clone());
        fetched
    }

    /// Fetches every sitemap the robots.txt advertises and queues the URLs
    /// it lists. Discovered URIs are anchored on a synthetic robots.txt
    /// parent at level 1, so they land at level 2.
    async fn discover_sitemaps(
        &self,
        engine: &Engine,
        crawl_uri: &CrawlUri,
        sitemaps: &[String],
    ) {
        let Some(robots_uri) = Self::robots_txt_uri(crawl_uri.uri()) else {
            return;
        };
        let found_on = CrawlUri::with_parts(robots_uri, 1, true, Some(crawl_uri.uri().clone()));

        for sitemap in sitemaps {
            let Ok(sitemap_uri) = Url::parse(sitemap) else {
                debug!(source = "robots", sitemap = %sitemap, "ignoring unparsable sitemap URL");
                continue;
            };

            let document = match engine
                .transport()
                .fetch(&sitemap_uri, engine.user_agent())
                .await
            {
                Ok(document) if document.status == 200 => document,
                Ok(document) => {
                    debug!(
                        source = "robots",
                        uri = %sitemap_uri,
                        status = document.status,
                        "skipping sitemap"
                    );
                    continue;
                }
                Err(e) => {
                    debug!(source = "robots", uri = %sitemap_uri, "sitemap fetch failed: {e}");
                    continue;
                }
            };

            let locations = sitemap_locations(&document.text());
            debug!(
                source = "robots",
                uri = %sitemap_uri,
                urls = locations.len(),
                "processed sitemap"
            );

            for location in locations {
                let Ok(location_uri) = Url::parse(&location) else {
                    continue;
                };
                if let Err(e) = engine.add_uri_to_queue(location_uri, &found_on, false).await {
                    debug!(source = "robots", location = %location, "could not queue sitemap URL: {e}");
                }
            }
        }
    }

    /// Applies the `noindex` / `nofollow` substring scan to a directive
    /// value and tags the URI accordingly. Matching is case-sensitive.
    fn apply_robots_directives(crawl_uri: &mut CrawlUri, value: &str, origin: &str) {
        for tag in [TAG_NOINDEX, TAG_NOFOLLOW] {
            if value.contains(tag) && !crawl_uri.has_tag(tag) {
                crawl_uri.add_tag(tag);
                debug!(
                    source = "robots",
                    "{}",
                    crawl_uri.log_line(&format!("Tagged {tag} from {origin}"))
                );
            }
        }
    }
}

#[async_trait]
impl Subscriber for RobotsSubscriber {
    fn name(&self) -> &'static str {
        "robots"
    }

    async fn should_request(&self, engine: &Engine, crawl_uri: &mut CrawlUri) -> Verdict {
        let robots_txt = self.robots_txt_for(engine, crawl_uri.uri()).await;

        // The parsed form stays inside this block; the hook future must not
        // carry it across an await.
        let mut sitemaps = Vec::new();
        if let Some(robots_txt) = robots_txt {
            if let Ok(robot) = Robot::new(engine.user_agent(), robots_txt.as_bytes()) {
                if !robot.allowed(crawl_uri.uri().as_str()) {
                    crawl_uri.add_tag(TAG_DISALLOWED_ROBOTS_TXT);
                    debug!(
                        source = "robots",
                        "{}",
                        crawl_uri.log_line("Tagged, disallowed by robots.txt")
                    );
                }

                if crawl_uri.level() == 0 {
                    sitemaps = robot.sitemaps.clone();
                }
            }
        }

        if !sitemaps.is_empty() {
            self.discover_sitemaps(engine, crawl_uri, &sitemaps).await;
        }

        // Whether the tag prevents requesting is left to other subscribers.
        Verdict::Abstain
    }

    async fn needs_content(
        &self,
        _engine: &Engine,
        crawl_uri: &mut CrawlUri,
        response: &CrawlResponse,
        _chunk: &Chunk,
    ) -> Verdict {
        for value in response.headers().get_all("x-robots-tag") {
            if let Ok(value) = value.to_str() {
                Self::apply_robots_directives(crawl_uri, value, "X-Robots-Tag header");
            }
        }

        Verdict::Abstain
    }

    async fn on_last_chunk(
        &self,
        _engine: &Engine,
        crawl_uri: &mut CrawlUri,
        response: &CrawlResponse,
        _chunk: &Chunk,
    ) {
        if !response.is_html() {
            return;
        }

        if let Some(content) = meta_robots_content(&response.text()) {
            Self::apply_robots_directives(crawl_uri, &content, "robots meta tag");
        }
    }
}

/// Extracts the `content` attribute of `<head><meta name="robots">`.
fn meta_robots_content(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"head meta[name="robots"]"#).unwrap();

    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("content"))
        .map(|content| content.to_string())
}

/// Iterates the `<url><loc>` entries of a sitemap document.
fn sitemap_locations(xml: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locations = Vec::new();
    let mut in_url = false;
    let mut in_loc = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => match element.name().as_ref() {
                b"url" => in_url = true,
                b"loc" if in_url => in_loc = true,
                _ => {}
            },
            Ok(Event::End(element)) => match element.name().as_ref() {
                b"url" => in_url = false,
                b"loc" => in_loc = false,
                _ => {}
            },
            Ok(Event::Text(text)) if in_loc => {
                if let Ok(location) = text.unescape() {
                    locations.push(location.into_owned());
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    locations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sitemap_url_locations() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <url><loc>http://a/p1</loc><lastmod>2024-01-01</lastmod></url>
                <url><loc>http://a/p2</loc></url>
            </urlset>"#;

        assert_eq!(sitemap_locations(xml), vec!["http://a/p1", "http://a/p2"]);
    }

    #[test]
    fn ignores_locations_outside_url_entries() {
        let xml = r#"<sitemapindex><sitemap><loc>http://a/nested.xml</loc></sitemap></sitemapindex>"#;
        assert!(sitemap_locations(xml).is_empty());
    }

    #[test]
    fn finds_the_robots_meta_tag() {
        let html = r#"<html><head>
            <meta charset="utf-8">
            <meta name="robots" content="noindex, nofollow">
            </head><body></body></html>"#;

        assert_eq!(
            meta_robots_content(html).as_deref(),
            Some("noindex, nofollow")
        );
        assert!(meta_robots_content("<html><body>hi</body></html>").is_none());
    }

    #[test]
    fn directive_matching_is_case_sensitive() {
        let mut uri = CrawlUri::new(Url::parse("http://a/").unwrap());

        RobotsSubscriber::apply_robots_directives(&mut uri, "NOINDEX, NOFOLLOW", "test");
        assert!(!uri.has_tag(TAG_NOINDEX));
        assert!(!uri.has_tag(TAG_NOFOLLOW));

        RobotsSubscriber::apply_robots_directives(&mut uri, "noindex", "test");
        assert!(uri.has_tag(TAG_NOINDEX));
        assert!(!uri.has_tag(TAG_NOFOLLOW));
    }

    #[test]
    fn derives_the_robots_txt_location() {
        let uri = Url::parse("http://a/deep/page?q=1#frag").unwrap();
        assert_eq!(
            RobotsSubscriber::robots_txt_uri(&uri).unwrap().as_str(),
            "http://a/robots.txt"
        );
    }
}
