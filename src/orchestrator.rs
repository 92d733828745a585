//! Archive jobs: concurrent fetches funnelled into one archive writer.
//!
//! [`Orchestrator::start`] spawns the job and hands back an [`ArchiveStream`];
//! [`Orchestrator::assemble`] additionally passes that stream to a [`Sink`].
//! The job runs in its own task and talks to the stream through a bounded
//! in-memory pipe, so a slow consumer stalls compression, which stalls the
//! fetch bodies. Dropping the stream aborts the job and every fetch in it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::io::{AsyncRead, DuplexStream, ReadBuf};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, Sleep};
use tracing::Instrument;
use url::Url;

use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::fetch::{ByteStream, FetchOutcome, Fetcher};
use crate::sink::{ArchiveResult, Sink};
use crate::source::SourceItem;
use crate::zip::{ArchiveWriter, EntryStatus};

/// Name of the synthetic entry listing failed sources
pub const ERROR_LOG_NAME: &str = "error_log.txt";

/// Reason recorded for sources cut off by the job deadline
const TIMEOUT_REASON: &str = "timeout";

/// One source that did not make it into the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    /// Locator of the source
    pub locator: Url,
    /// Why it failed
    pub reason: String,
}

/// What a finished job put into its archive
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobReport {
    /// Identifier used in logs for this job
    pub job_id: String,
    /// Data entries in write order (the error log is not included)
    pub entries: Vec<String>,
    /// Sources missing from the archive, in input order
    pub failures: Vec<FetchFailure>,
    /// Size of the finished archive in bytes
    pub bytes_written: u64,
}

impl JobReport {
    /// Whether the archive carries an error log entry
    pub fn has_error_log(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Settings that shape one job
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub max_concurrency: usize,
    pub job_deadline: Duration,
    pub compression_level: u32,
    pub pipe_capacity: usize,
    pub store_extensions: Vec<String>,
}

impl From<&ArchiveConfig> for JobSettings {
    fn from(config: &ArchiveConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            job_deadline: config.job_deadline,
            compression_level: config.compression_level,
            pipe_capacity: config.pipe_capacity.max(1),
            store_extensions: config.store_extensions.clone(),
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from(&ArchiveConfig::default())
    }
}

/// Drives the fetches of one archive job
///
/// Holds no state between jobs beyond its fetcher and settings; every
/// [`start`](Self::start) call gets its own writer, pipe and fetch pool.
pub struct Orchestrator {
    fetcher: Arc<dyn Fetcher>,
    settings: JobSettings,
}

impl Orchestrator {
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: JobSettings) -> Self {
        Self { fetcher, settings }
    }

    /// Build the archive for `sources` and deliver it through `sink`
    ///
    /// Fails only for an empty source list, a write/finalize failure, or a
    /// sink failure. Individual sources that cannot be fetched end up in
    /// `error_log.txt` instead.
    pub async fn assemble<S>(&self, sources: Vec<SourceItem>, sink: &S) -> Result<ArchiveResult>
    where
        S: Sink + ?Sized,
    {
        let archive = self.start(sources)?;
        sink.consume(archive).await
    }

    /// Spawn the job and return the archive bytes as a stream
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, sources: Vec<SourceItem>) -> Result<ArchiveStream> {
        if sources.is_empty() {
            return Err(Error::Validation(
                "an archive needs at least one source".to_string(),
            ));
        }

        let job_id = new_job_id();
        let (writer_half, reader_half) = tokio::io::duplex(self.settings.pipe_capacity);
        let job = ArchiveJob {
            job_id: job_id.clone(),
            sources,
            fetcher: Arc::clone(&self.fetcher),
            settings: self.settings.clone(),
        };

        let span = tracing::info_span!("archive_job", %job_id);
        let handle = tokio::spawn(job.run(writer_half).instrument(span));

        Ok(ArchiveStream {
            pipe: reader_half,
            job: Some(handle),
            tracker: JobTracker::default(),
        })
    }
}

/// One request's worth of work; lives only as long as the job task
struct ArchiveJob {
    job_id: String,
    sources: Vec<SourceItem>,
    fetcher: Arc<dyn Fetcher>,
    settings: JobSettings,
}

impl ArchiveJob {
    async fn run(self, out: DuplexStream) -> Result<JobReport> {
        let deadline = Instant::now() + self.settings.job_deadline;
        let mut writer = ArchiveWriter::new(out)
            .with_compression_level(self.settings.compression_level)
            .with_store_extensions(&self.settings.store_extensions);

        tracing::info!(
            sources = self.sources.len(),
            max_concurrency = self.settings.max_concurrency,
            "archive job started"
        );

        let limit = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut pending: HashMap<usize, Url> = HashMap::with_capacity(self.sources.len());
        let mut tasks = JoinSet::new();

        for (index, item) in self.sources.into_iter().enumerate() {
            pending.insert(index, item.locator.clone());
            let fetcher = Arc::clone(&self.fetcher);
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                // The permit travels with the outcome so an unread body still counts
                let permit = limit.acquire_owned().await.ok();
                let outcome = fetcher.fetch(&item).await;
                (index, outcome, permit)
            });
        }

        let mut entries = Vec::new();
        let mut failures: Vec<(usize, FetchFailure)> = Vec::new();
        let mut timed_out = false;

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            // Fetches that settled before the deadline are still written
            let joined = tokio::select! {
                biased;
                next = tasks.join_next() => match next {
                    Some(joined) => joined,
                    None => break,
                },
                _ = &mut sleep => {
                    timed_out = true;
                    tracing::warn!(pending = pending.len(), "job deadline reached");
                    tasks.abort_all();
                    break;
                }
            };

            // A panicked fetch stays in `pending` and is logged below
            let Ok((index, outcome, permit)) = joined else {
                continue;
            };
            let Some(locator) = pending.remove(&index) else {
                continue;
            };

            match outcome {
                FetchOutcome::Fetched {
                    name, mut stream, ..
                } => match writer
                    .add_entry(&name, &mut UntilDeadline::new(&mut stream, deadline))
                    .await?
                {
                    EntryStatus::Written { name, .. } => entries.push(name),
                    EntryStatus::Abandoned { reason, .. } => {
                        failures.push((index, FetchFailure { locator, reason }));
                    }
                },
                FetchOutcome::Failed { locator, reason } => {
                    failures.push((index, FetchFailure { locator, reason }));
                }
            }
            drop(permit);
        }

        let leftover_reason = if timed_out {
            TIMEOUT_REASON
        } else {
            "fetch task failed"
        };
        failures.extend(pending.into_iter().map(|(index, locator)| {
            (
                index,
                FetchFailure {
                    locator,
                    reason: leftover_reason.to_string(),
                },
            )
        }));
        failures.sort_by_key(|(index, _)| *index);
        let failures: Vec<FetchFailure> = failures.into_iter().map(|(_, f)| f).collect();

        if !failures.is_empty() {
            for failure in &failures {
                tracing::debug!(locator = %failure.locator, reason = %failure.reason, "source missing from archive");
            }
            let mut log = std::io::Cursor::new(error_log(&failures).into_bytes());
            writer.add_entry(ERROR_LOG_NAME, &mut log).await?;
        }

        let summary = writer.finalize().await?;
        tracing::info!(
            entries = entries.len(),
            failures = failures.len(),
            bytes = summary.bytes_written,
            "archive job finished"
        );

        Ok(JobReport {
            job_id: self.job_id,
            entries,
            failures,
            bytes_written: summary.bytes_written,
        })
    }
}

/// Source body that fails with `TimedOut` once the job deadline passes
///
/// Bytes the source already has ready are still handed out, so only a body
/// that is actually waiting on the network gets cut off.
struct UntilDeadline<'a> {
    inner: &'a mut ByteStream,
    deadline: Pin<Box<Sleep>>,
}

impl<'a> UntilDeadline<'a> {
    fn new(inner: &'a mut ByteStream, deadline: Instant) -> Self {
        Self {
            inner,
            deadline: Box::pin(tokio::time::sleep_until(deadline)),
        }
    }
}

impl AsyncRead for UntilDeadline<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(read) = this.inner.as_mut().poll_read(cx, buf) {
            return Poll::Ready(read);
        }
        ready!(this.deadline.as_mut().poll(cx));
        Poll::Ready(Err(io::Error::new(io::ErrorKind::TimedOut, TIMEOUT_REASON)))
    }
}

/// Body of `error_log.txt`: one line per failed source
pub fn error_log(failures: &[FetchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("Failed to download: {}\n", f.locator))
        .collect()
}

fn new_job_id() -> String {
    format!(
        "{}-{:08x}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S"),
        rand::random::<u32>()
    )
}

#[derive(Debug, Default)]
enum JobState {
    #[default]
    Running,
    Finished(JobReport),
    Failed(Error),
    Taken,
}

/// Shared view of how a job ended, readable after its stream was handed off
#[derive(Debug, Clone, Default)]
pub struct JobTracker(Arc<Mutex<JobState>>);

impl JobTracker {
    /// The report of a job that completed, once
    pub fn take_report(&self) -> Option<JobReport> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, JobState::Taken) {
            JobState::Finished(report) => Some(report),
            other => {
                *state = other;
                None
            }
        }
    }

    /// The error of a job that failed, once
    pub fn take_error(&self) -> Option<Error> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, JobState::Taken) {
            JobState::Failed(error) => Some(error),
            other => {
                *state = other;
                None
            }
        }
    }

    fn set(&self, next: JobState) {
        *self.lock() = next;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, JobState> {
        // The state is replaced whole, so a poisoned lock still holds a valid value
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The archive bytes of a running job
///
/// Reads end cleanly only when the job finalized the archive; if the job
/// failed, the last read returns an error instead of EOF, so a consumer can
/// never mistake a truncated archive for a complete one. Dropping the stream
/// cancels the job.
pub struct ArchiveStream {
    pipe: DuplexStream,
    job: Option<JoinHandle<Result<JobReport>>>,
    tracker: JobTracker,
}

impl ArchiveStream {
    /// Handle for reading the job's report or error after the stream is consumed
    pub fn tracker(&self) -> JobTracker {
        self.tracker.clone()
    }
}

impl AsyncRead for ArchiveStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.pipe).poll_read(cx, buf))?;
        if buf.filled().len() > before {
            return Poll::Ready(Ok(()));
        }

        // Pipe closed: the job either finalized or gave up
        let Some(handle) = this.job.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let joined = ready!(Pin::new(handle).poll(cx));
        this.job = None;

        match joined {
            Ok(Ok(report)) => {
                this.tracker.set(JobState::Finished(report));
                Poll::Ready(Ok(()))
            }
            Ok(Err(error)) => {
                let message = error.to_string();
                this.tracker.set(JobState::Failed(error));
                Poll::Ready(Err(io::Error::other(message)))
            }
            Err(join_error) => {
                let error = if join_error.is_cancelled() {
                    Error::Cancelled
                } else {
                    Error::Io(io::Error::other(format!("archive job panicked: {join_error}")))
                };
                let message = error.to_string();
                this.tracker.set(JobState::Failed(error));
                Poll::Ready(Err(io::Error::other(message)))
            }
        }
    }
}

impl Drop for ArchiveStream {
    fn drop(&mut self) {
        if let Some(handle) = self.job.take() {
            handle.abort();
        }
    }
}
