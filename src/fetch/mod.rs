//! Retrieval of source items.
//!
//! A [`Fetcher`] never fails: every call settles into a [`FetchOutcome`], and a
//! failed source is just a value the orchestrator folds into the error log.

mod http;

pub use http::HttpFetcher;

use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;
use url::Url;

use crate::source::SourceItem;

/// Owned, readable byte stream of unknown length
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Settled result of retrieving one source item
pub enum FetchOutcome {
    /// The source answered; `stream` must be drained or dropped by the caller
    Fetched {
        /// Name requested for the archive entry
        name: String,
        /// Body of the source
        stream: ByteStream,
        /// Size announced by the source, when it announced one
        size: Option<u64>,
    },
    /// The source could not be retrieved
    Failed {
        /// Locator that failed
        locator: Url,
        /// Short human-readable cause ("timeout", "HTTP 404 Not Found", ...)
        reason: String,
    },
}

impl FetchOutcome {
    /// Failure outcome for `item`
    pub fn failed(item: &SourceItem, reason: impl Into<String>) -> Self {
        FetchOutcome::Failed {
            locator: item.locator.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Fetched { name, size, .. } => f
                .debug_struct("Fetched")
                .field("name", name)
                .field("size", size)
                .finish_non_exhaustive(),
            FetchOutcome::Failed { locator, reason } => f
                .debug_struct("Failed")
                .field("locator", &locator.as_str())
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Retrieves one source item as a stream
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Open `item` for reading
    ///
    /// Must not panic or return early on errors: network failures, non-success
    /// statuses and timeouts all become [`FetchOutcome::Failed`].
    async fn fetch(&self, item: &SourceItem) -> FetchOutcome;
}
