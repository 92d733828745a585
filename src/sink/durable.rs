use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use url::Url;

use super::{ArchiveResult, Sink};
use crate::error::{Result, SinkError};
use crate::orchestrator::{ArchiveStream, JobReport};
use crate::storage::ObjectStore;

/// An archive that has been uploaded and acknowledged by the store
#[derive(Debug, Clone, Serialize)]
pub struct StoredArchive {
    pub key: String,
    pub public_url: Url,
    pub report: JobReport,
}

/// Uploads archives to an object store under a fresh, timestamped key
pub struct DurableSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl DurableSink {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Upload `archive` and return where it can be read
    ///
    /// The URL is returned only after the store acknowledged the complete
    /// archive. On any failure the object is deleted on a best-effort basis
    /// and the job's own error, if it had one, is returned in preference to the
    /// upload error it caused.
    pub async fn store(&self, archive: ArchiveStream) -> Result<StoredArchive> {
        let key = object_key(&self.prefix);
        let tracker = archive.tracker();

        let failure = match self.store.put_object(&key, Box::pin(archive)).await {
            Ok(public_url) => match tracker.take_report() {
                Some(report) => {
                    tracing::info!(
                        key = %key,
                        url = %public_url,
                        entries = report.entries.len(),
                        failures = report.failures.len(),
                        bytes = report.bytes_written,
                        "archive stored"
                    );
                    return Ok(StoredArchive {
                        key,
                        public_url,
                        report,
                    });
                }
                None => SinkError::Incomplete { key: key.clone() },
            },
            Err(source) => SinkError::Upload {
                key: key.clone(),
                source,
            },
        };

        tracing::error!(key = %key, error = %failure, "archive upload failed");
        if let Err(e) = self.store.delete_object(&key).await {
            tracing::warn!(key = %key, error = %e, "failed to delete partial archive");
        }
        Err(tracker.take_error().unwrap_or_else(|| failure.into()))
    }
}

#[async_trait]
impl Sink for DurableSink {
    async fn consume(&self, archive: ArchiveStream) -> Result<ArchiveResult> {
        self.store(archive).await.map(ArchiveResult::Stored)
    }
}

/// `<prefix>-<UTC timestamp>-<8 hex digits>.zip`
fn object_key(prefix: &str) -> String {
    format!(
        "{}-{}-{:08x}.zip",
        prefix,
        chrono::Utc::now().format("%Y%m%dT%H%M%S"),
        rand::random::<u32>()
    )
}
