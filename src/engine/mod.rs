//! # Engine Module
//!
//! The dispatcher at the center of the crate.
//!
//! The [`Engine`] owns the queue handle, the transport, and the ordered
//! subscriber list. Its `crawl` loop alternates between two phases until the
//! job is drained or the request limit is hit:
//!
//! - **Prepare**: pull unprocessed `CrawlUri`s from the queue up to the
//!   concurrency limit, let subscribers vote on `should_request`, and start
//!   GET requests (paced by the optional request delay).
//! - **Stream**: multiplex every in-flight response chunk by chunk, let
//!   subscribers vote on `needs_content` at header time, cancel unwanted
//!   transfers, and fire `on_last_chunk` when bodies complete.
//!
//! All engine state is owned by the single dispatch task; subscribers run
//! inline on it and call back through a borrowed engine handle.

mod core;
mod dispatch;

pub use self::core::{Engine, EngineConfig};
