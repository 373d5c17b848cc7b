//! A "prelude" for users of the `crawlet` crate.
//!
//! This prelude re-exports the most commonly used traits, structs, and
//! macros so that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use crawlet::prelude::*;
//! ```

pub use crate::{
    // Core structs
    BaseUriCollection,
    CrawlUri,
    Engine,
    JobId,
    MemoryQueue,
    // Core traits
    HttpTransport,
    Queue,
    Subscriber,
    // Hook vocabulary
    Capabilities,
    Verdict,
    // Bundled subscribers
    LinksSubscriber,
    RobotsSubscriber,
    // Essential re-export for trait implementation
    async_trait,
};

pub use crate::error::CrawlError;
pub use url::Url;
