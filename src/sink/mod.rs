//! Consumers of a finished archive stream.
//!
//! A [`Sink`] turns an [`ArchiveStream`] into what the caller gets back: the
//! [`LiveSink`] relays the bytes as they are produced, the [`DurableSink`]
//! uploads them and hands out a public URL. A sink failure is always the job's
//! failure.

mod durable;
mod live;

pub use durable::{DurableSink, StoredArchive};
pub use live::{LiveArchive, LiveSink};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::orchestrator::ArchiveStream;

/// Which kind of sink delivered an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Live,
    Durable,
}

/// What a sink hands back to the caller
pub enum ArchiveResult {
    /// Bytes are still being produced and must be read by the caller
    Live(LiveArchive),
    /// The archive is stored and publicly readable
    Stored(StoredArchive),
}

impl ArchiveResult {
    pub fn kind(&self) -> SinkKind {
        match self {
            ArchiveResult::Live(_) => SinkKind::Live,
            ArchiveResult::Stored(_) => SinkKind::Durable,
        }
    }
}

/// Consumes the byte stream of one archive job
#[async_trait]
pub trait Sink: Send + Sync {
    /// Take ownership of `archive` and deliver it
    ///
    /// Dropping `archive` without reading it to the end cancels the job.
    async fn consume(&self, archive: ArchiveStream) -> Result<ArchiveResult>;
}
