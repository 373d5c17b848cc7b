//! Integration tests for the crawl engine.
//!
//! These tests use wiremock to create mock HTTP servers and drive full
//! crawl passes end-to-end: seeding, subscriber arbitration, streaming,
//! robots policies, and error routing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crawlet::prelude::*;
use crawlet::{Chunk, CrawlError, CrawlResponse, HttpError, TransportError};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Observation points shared between a test and its probe subscriber.
#[derive(Default)]
struct Probe {
    finished: AtomicUsize,
    transport_errors: AtomicUsize,
    http_errors: AtomicUsize,
}

/// A subscriber that influences nothing and records everything optional.
struct ProbeSubscriber {
    probe: Arc<Probe>,
}

#[async_trait]
impl Subscriber for ProbeSubscriber {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
            .with_error_handling()
            .with_finished_crawling()
    }

    async fn should_request(&self, _engine: &Engine, _crawl_uri: &mut CrawlUri) -> Verdict {
        Verdict::Abstain
    }

    async fn needs_content(
        &self,
        _engine: &Engine,
        _crawl_uri: &mut CrawlUri,
        _response: &CrawlResponse,
        _chunk: &Chunk,
    ) -> Verdict {
        Verdict::Abstain
    }

    async fn on_last_chunk(
        &self,
        _engine: &Engine,
        _crawl_uri: &mut CrawlUri,
        _response: &CrawlResponse,
        _chunk: &Chunk,
    ) {
    }

    async fn on_transport_error(
        &self,
        _engine: &Engine,
        _crawl_uri: &mut CrawlUri,
        _error: &TransportError,
        _response: Option<&CrawlResponse>,
    ) {
        self.probe.transport_errors.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_http_error(
        &self,
        _engine: &Engine,
        _crawl_uri: &mut CrawlUri,
        _error: &HttpError,
        _response: &CrawlResponse,
        _chunk: &Chunk,
    ) {
        self.probe.http_errors.fetch_add(1, Ordering::SeqCst);
    }

    async fn finished_crawling(&self, _engine: &Engine) {
        self.probe.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn page_url(server: &MockServer, page_path: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), page_path)).unwrap()
}

fn seeds(urls: &[Url]) -> BaseUriCollection {
    urls.iter().cloned().collect()
}

async fn mount_html(server: &MockServer, page_path: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html"))
        .mount(server)
        .await;
}

async fn mount_text(server: &MockServer, page_path: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/plain"))
        .mount(server)
        .await;
}

async fn engine_for(seed_urls: &[Url]) -> Engine {
    Engine::create(seeds(seed_urls), Arc::new(MemoryQueue::new()), None)
        .await
        .unwrap()
        .with_user_agent("crawlet-tests/1.0")
}

fn requests_sent(engine: &Engine) -> usize {
    engine.stats().requests_sent.load(Ordering::SeqCst)
}

#[tokio::test]
async fn single_seed_without_links_makes_one_request() {
    let server = MockServer::start().await;
    mount_html(&server, "/", "<html><body>hi</body></html>").await;

    let seed = page_url(&server, "/");
    let probe = Arc::new(Probe::default());

    let mut engine = engine_for(&[seed.clone()]).await;
    engine.add_subscriber(LinksSubscriber::new());
    engine.add_subscriber(ProbeSubscriber {
        probe: probe.clone(),
    });

    engine.crawl().await.unwrap();

    assert_eq!(requests_sent(&engine), 1);
    assert_eq!(probe.finished.load(Ordering::SeqCst), 1);

    let stored = engine.get_crawl_uri(&seed).await.unwrap().unwrap();
    assert!(stored.is_processed());
    assert_eq!(stored.level(), 0);
    assert!(engine.queue().get_next(engine.job_id()).await.unwrap().is_none());
}

#[tokio::test]
async fn depth_limit_skips_deep_uris_without_requesting_them() {
    let server = MockServer::start().await;
    mount_html(&server, "/", r#"<html><body><a href="/x">x</a></body></html>"#).await;
    mount_html(&server, "/x", r#"<html><body><a href="/y">y</a></body></html>"#).await;
    Mock::given(method("GET"))
        .and(path("/y"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut engine = engine_for(&[page_url(&server, "/")]).await.with_max_depth(2);
    engine.add_subscriber(LinksSubscriber::new());

    engine.crawl().await.unwrap();

    assert_eq!(requests_sent(&engine), 2);

    // The deep URI was queued and consumed, but never requested.
    let deep = engine
        .get_crawl_uri(&page_url(&server, "/y"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deep.level(), 2);
    assert!(deep.is_processed());
    assert_eq!(
        engine.stats().requests_skipped.load(Ordering::SeqCst),
        1
    );

    server.verify().await;
}

#[tokio::test]
async fn robots_disallow_tags_and_blocks_the_uri() {
    let server = MockServer::start().await;
    mount_text(&server, "/robots.txt", "User-agent: *\nDisallow: /private/\n").await;
    mount_html(
        &server,
        "/",
        r#"<html><body><a href="/public">p</a><a href="/private/x">x</a></body></html>"#,
    )
    .await;
    mount_html(&server, "/public", "<html><body>public</body></html>").await;
    Mock::given(method("GET"))
        .and(path("/private/x"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut engine = engine_for(&[page_url(&server, "/")]).await;
    engine.add_subscriber(RobotsSubscriber::new());
    engine.add_subscriber(LinksSubscriber::new());

    engine.crawl().await.unwrap();

    // The root and /public went out; the disallowed URI did not.
    assert_eq!(requests_sent(&engine), 2);

    let private = engine
        .get_crawl_uri(&page_url(&server, "/private/x"))
        .await
        .unwrap()
        .unwrap();
    assert!(private.has_tag(crawlet::TAG_DISALLOWED_ROBOTS_TXT));
    assert!(private.is_processed());

    server.verify().await;
}

#[tokio::test]
async fn sitemap_uris_land_at_level_two_under_the_robots_parent() {
    let server = MockServer::start().await;
    mount_text(
        &server,
        "/robots.txt",
        &format!("Sitemap: {}/sm.xml\n", server.uri()),
    )
    .await;
    mount_html(&server, "/", "<html><body>root</body></html>").await;
    Mock::given(method("GET"))
        .and(path("/sm.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(
                r#"<?xml version="1.0"?><urlset>
                    <url><loc>{0}/p1</loc></url>
                    <url><loc>{0}/p2</loc></url>
                </urlset>"#,
                server.uri()
            ),
            "application/xml",
        ))
        .mount(&server)
        .await;
    mount_html(&server, "/p1", "<html><body>p1</body></html>").await;
    mount_html(&server, "/p2", "<html><body>p2</body></html>").await;

    let mut engine = engine_for(&[page_url(&server, "/")]).await;
    engine.add_subscriber(RobotsSubscriber::new());
    engine.add_subscriber(LinksSubscriber::new());

    engine.crawl().await.unwrap();

    let robots_url = page_url(&server, "/robots.txt");
    for page in ["/p1", "/p2"] {
        let entry = engine
            .get_crawl_uri(&page_url(&server, page))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.level(), 2);
        assert_eq!(entry.found_on(), Some(&robots_url));
        assert!(entry.is_processed());
    }

    // Root plus the two sitemap discoveries.
    assert_eq!(requests_sent(&engine), 3);
}

#[tokio::test]
async fn meta_robots_nofollow_tags_the_page_but_links_still_flow() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/",
        r#"<html><head><meta name="robots" content="nofollow"></head>
           <body><a href="/next">next</a></body></html>"#,
    )
    .await;
    mount_html(&server, "/next", "<html><body>next</body></html>").await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut engine = engine_for(&[page_url(&server, "/")]).await;
    engine.add_subscriber(RobotsSubscriber::new());
    engine.add_subscriber(LinksSubscriber::new());

    engine.crawl().await.unwrap();

    let root = engine
        .get_crawl_uri(&page_url(&server, "/"))
        .await
        .unwrap()
        .unwrap();
    assert!(root.has_tag(crawlet::TAG_NOFOLLOW));
    assert!(!root.has_tag(crawlet::TAG_NOINDEX));

    // Outbound links are still enqueued; acting on the tag is left to
    // collaborating subscribers.
    let next = engine
        .get_crawl_uri(&page_url(&server, "/next"))
        .await
        .unwrap()
        .unwrap();
    assert!(next.is_processed());
}

#[tokio::test]
async fn x_robots_tag_header_tags_the_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>ok</body></html>".to_string(), "text/html")
                .insert_header("x-robots-tag", "noindex, nofollow"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut engine = engine_for(&[page_url(&server, "/")]).await;
    engine.add_subscriber(RobotsSubscriber::new());
    engine.add_subscriber(LinksSubscriber::new());

    engine.crawl().await.unwrap();

    let root = engine
        .get_crawl_uri(&page_url(&server, "/"))
        .await
        .unwrap()
        .unwrap();
    assert!(root.has_tag(crawlet::TAG_NOINDEX));
    assert!(root.has_tag(crawlet::TAG_NOFOLLOW));
}

#[tokio::test]
async fn transport_failure_on_one_seed_leaves_the_other_untouched() {
    let server = MockServer::start().await;
    mount_html(&server, "/", "<html><body>alive</body></html>").await;

    // Nothing listens on port 1; the connection is refused immediately.
    let dead = Url::parse("http://127.0.0.1:1/").unwrap();
    let alive = page_url(&server, "/");
    let probe = Arc::new(Probe::default());

    let mut engine = engine_for(&[dead, alive.clone()]).await;
    engine.add_subscriber(LinksSubscriber::new());
    engine.add_subscriber(ProbeSubscriber {
        probe: probe.clone(),
    });

    engine.crawl().await.unwrap();

    // Both requests started, one failed, the crawl terminated cleanly.
    assert_eq!(requests_sent(&engine), 2);
    assert_eq!(probe.transport_errors.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().transport_errors.load(Ordering::SeqCst), 1);

    let stored = engine.get_crawl_uri(&alive).await.unwrap().unwrap();
    assert!(stored.is_processed());
}

#[tokio::test]
async fn http_error_is_routed_to_error_capable_subscribers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let probe = Arc::new(Probe::default());
    let mut engine = engine_for(&[page_url(&server, "/")]).await;
    engine.add_subscriber(LinksSubscriber::new());
    engine.add_subscriber(ProbeSubscriber {
        probe: probe.clone(),
    });

    engine.crawl().await.unwrap();

    assert_eq!(requests_sent(&engine), 1);
    assert_eq!(probe.http_errors.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().http_errors.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().responses_completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn max_requests_caps_a_pass_and_leaves_the_rest_unprocessed() {
    let server = MockServer::start().await;
    mount_html(&server, "/a", "<html><body>a</body></html>").await;
    mount_html(&server, "/b", "<html><body>b</body></html>").await;
    mount_html(&server, "/c", "<html><body>c</body></html>").await;

    let all = [
        page_url(&server, "/a"),
        page_url(&server, "/b"),
        page_url(&server, "/c"),
    ];

    let mut engine = engine_for(&all).await.with_max_requests(1);
    engine.add_subscriber(LinksSubscriber::new());

    engine.crawl().await.unwrap();

    assert_eq!(requests_sent(&engine), 1);
    // The untouched seeds are still waiting for a later pass.
    assert!(engine
        .queue()
        .get_next(engine.job_id())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn request_delay_spaces_consecutive_request_starts() {
    let server = MockServer::start().await;
    mount_html(&server, "/a", "<html><body>a</body></html>").await;
    mount_html(&server, "/b", "<html><body>b</body></html>").await;

    let mut engine = engine_for(&[page_url(&server, "/a"), page_url(&server, "/b")])
        .await
        .with_request_delay(Duration::from_millis(60));
    engine.add_subscriber(LinksSubscriber::new());

    let started = Instant::now();
    engine.crawl().await.unwrap();

    // One delay before each of the two request starts.
    assert!(started.elapsed() >= Duration::from_millis(110));
    assert_eq!(requests_sent(&engine), 2);
}

#[tokio::test]
async fn unwanted_content_is_canceled_at_the_first_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(vec![0u8; 65536], "application/pdf"),
        )
        .mount(&server)
        .await;

    let mut engine = engine_for(&[page_url(&server, "/")]).await;
    engine.add_subscriber(LinksSubscriber::new());

    engine.crawl().await.unwrap();

    assert_eq!(requests_sent(&engine), 1);
    assert_eq!(engine.stats().transfers_canceled.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().responses_completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_http_schemes_are_never_requested() {
    let server = MockServer::start().await;
    mount_html(&server, "/", "<html><body>ok</body></html>").await;

    let mut engine = engine_for(&[
        page_url(&server, "/"),
        Url::parse("ftp://example.com/file").unwrap(),
    ])
    .await;
    engine.add_subscriber(LinksSubscriber::new());

    engine.crawl().await.unwrap();

    assert_eq!(requests_sent(&engine), 1);
    assert_eq!(engine.stats().requests_skipped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn create_requires_base_uris() {
    let result = Engine::create(BaseUriCollection::new(), Arc::new(MemoryQueue::new()), None).await;
    assert!(matches!(result, Err(CrawlError::EmptyBaseUris)));
}

#[tokio::test]
async fn resume_requires_a_known_job() {
    let result = Engine::resume(JobId::from("unknown"), Arc::new(MemoryQueue::new()), None).await;
    assert!(matches!(result, Err(CrawlError::InvalidJobId(_))));
}

#[tokio::test]
async fn resuming_a_drained_job_is_a_noop_with_finish_dispatch() {
    let server = MockServer::start().await;
    mount_html(&server, "/", "<html><body>hi</body></html>").await;

    let queue: Arc<MemoryQueue> = Arc::new(MemoryQueue::new());
    let mut first = Engine::create(
        seeds(&[page_url(&server, "/")]),
        queue.clone(),
        None,
    )
    .await
    .unwrap();
    first.add_subscriber(LinksSubscriber::new());
    first.crawl().await.unwrap();
    assert_eq!(requests_sent(&first), 1);

    let probe = Arc::new(Probe::default());
    let mut resumed = Engine::resume(first.job_id().clone(), queue, None)
        .await
        .unwrap();
    resumed.add_subscriber(LinksSubscriber::new());
    resumed.add_subscriber(ProbeSubscriber {
        probe: probe.clone(),
    });

    resumed.crawl().await.unwrap();

    assert_eq!(requests_sent(&resumed), 0);
    assert_eq!(probe.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn queueing_the_same_uri_twice_returns_the_existing_entry() {
    let server = MockServer::start().await;
    let engine = engine_for(&[page_url(&server, "/")]).await;

    let parent = engine
        .get_crawl_uri(&page_url(&server, "/"))
        .await
        .unwrap()
        .unwrap();
    let child_url = page_url(&server, "/child");

    let first = engine
        .add_uri_to_queue(child_url.clone(), &parent, false)
        .await
        .unwrap();
    let second = engine
        .add_uri_to_queue(child_url, &parent, false)
        .await
        .unwrap();

    assert_eq!(first.identity(), second.identity());
    assert_eq!(first.level(), 1);
    assert_eq!(engine.stats().uris_enqueued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrency_of_one_still_drains_the_queue() {
    let server = MockServer::start().await;
    mount_html(&server, "/a", r#"<html><body><a href="/b">b</a></body></html>"#).await;
    mount_html(&server, "/b", "<html><body>b</body></html>").await;

    let mut engine = engine_for(&[page_url(&server, "/a")]).await.with_concurrency(1);
    engine.add_subscriber(LinksSubscriber::new());

    engine.crawl().await.unwrap();

    assert_eq!(requests_sent(&engine), 2);
    assert_eq!(engine.stats().responses_completed.load(Ordering::SeqCst), 2);
}
