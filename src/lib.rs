//! # crawlet
//!
//! Core engine of a polite, extensible web crawler.
//!
//! Provides the main components: `Engine`, the `Queue` contract with
//! in-memory and file-backed implementations, the `Subscriber` extension
//! trait, and the bundled `RobotsSubscriber` / `LinksSubscriber` policies.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crawlet::{BaseUriCollection, Engine, LinksSubscriber, MemoryQueue, RobotsSubscriber};
//! use url::Url;
//!
//! async fn run() -> Result<(), crawlet::CrawlError> {
//!     let seeds: BaseUriCollection =
//!         [Url::parse("https://example.com/").unwrap()].into_iter().collect();
//!
//!     let mut engine = Engine::create(seeds, Arc::new(MemoryQueue::new()), None)
//!         .await?
//!         .with_user_agent("example-bot/1.0")
//!         .with_concurrency(4)
//!         .with_max_depth(3);
//!
//!     engine.add_subscriber(RobotsSubscriber::new());
//!     engine.add_subscriber(LinksSubscriber::new());
//!
//!     engine.crawl().await?;
//!     println!("{}", engine.stats());
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod file_queue;
pub mod links;
pub mod prelude;
pub mod queue;
pub mod response;
pub mod robots;
pub mod stats;
pub mod subscriber;
pub mod transport;
pub mod uri;

mod decision;

pub use engine::{Engine, EngineConfig};
pub use error::{CrawlError, HttpError, QueueError, TransportError};
pub use file_queue::FileQueue;
pub use links::LinksSubscriber;
pub use queue::{JobId, MemoryQueue, Queue};
pub use response::{Chunk, CrawlResponse};
pub use robots::{RobotsSubscriber, TAG_DISALLOWED_ROBOTS_TXT, TAG_NOFOLLOW, TAG_NOINDEX};
pub use stats::StatCollector;
pub use subscriber::{Capabilities, Subscriber, Verdict};
pub use transport::{
    FetchedDocument, HttpTransport, ReqwestTransport, ResponseStream, TransportRequest,
};
pub use uri::{normalize_uri, BaseUriCollection, CrawlUri};

pub use async_trait::async_trait;
pub use tokio;
pub use url::Url;
