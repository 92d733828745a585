use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use std::io::{self, Cursor};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, Chain};
use tokio_util::io::ReaderStream;

use super::{ArchiveResult, Sink};
use crate::error::{Error, Result, SinkError};
use crate::orchestrator::{ArchiveStream, JobTracker};

/// Bytes read before the response is committed
const FIRST_CHUNK_SIZE: usize = 16 * 1024;

/// Relays an archive to a caller as it is produced
///
/// The first chunk is read before anything is handed back, so a job that fails
/// before producing a byte still reports a proper error. After that the
/// caller's read pace drives the whole job.
#[derive(Debug, Clone)]
pub struct LiveSink {
    filename: String,
}

impl LiveSink {
    /// `name` becomes the attachment filename, with `.zip` appended if missing
    pub fn new(name: &str) -> Self {
        let mut filename = attachment_name(name);
        if !filename.to_ascii_lowercase().ends_with(".zip") {
            filename.push_str(".zip");
        }
        Self { filename }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Wait for the first bytes of `archive`
    pub async fn open(&self, mut archive: ArchiveStream) -> Result<LiveArchive> {
        let tracker = archive.tracker();
        let mut first_chunk = vec![0u8; FIRST_CHUNK_SIZE];

        let read = match archive.read(&mut first_chunk).await {
            Ok(read) => read,
            Err(e) => return Err(tracker.take_error().unwrap_or(Error::Io(e))),
        };
        if read == 0 {
            return Err(tracker
                .take_error()
                .unwrap_or(Error::Sink(SinkError::EmptyStream)));
        }
        first_chunk.truncate(read);

        Ok(LiveArchive {
            filename: self.filename.clone(),
            first_chunk,
            archive,
        })
    }
}

#[async_trait]
impl Sink for LiveSink {
    async fn consume(&self, archive: ArchiveStream) -> Result<ArchiveResult> {
        self.open(archive).await.map(ArchiveResult::Live)
    }
}

/// An archive whose first bytes exist and whose rest is still streaming
pub struct LiveArchive {
    filename: String,
    first_chunk: Vec<u8>,
    archive: ArchiveStream,
}

impl LiveArchive {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Report of the job once the reader has reached the end
    pub fn tracker(&self) -> JobTracker {
        self.archive.tracker()
    }

    /// All archive bytes, starting with the chunk already read
    pub fn into_reader(self) -> Chain<Cursor<Vec<u8>>, ArchiveStream> {
        Cursor::new(self.first_chunk).chain(self.archive)
    }

    /// Relay the whole archive into `out`, returning the bytes copied
    ///
    /// A failing `out` is reported as [`SinkError::Disconnected`]; the job is
    /// cancelled as the archive is dropped on the way out.
    pub async fn copy_to<W>(self, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let tracker = self.tracker();
        let mut reader = self.into_reader();
        let mut buf = vec![0u8; FIRST_CHUNK_SIZE];
        let mut copied = 0u64;

        loop {
            let read = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => return Err(tracker.take_error().unwrap_or(Error::Io(e))),
            };
            out.write_all(&buf[..read]).await.map_err(disconnected)?;
            copied += read as u64;
        }
        out.flush().await.map_err(disconnected)?;

        Ok(copied)
    }
}

fn disconnected(error: io::Error) -> Error {
    tracing::warn!(error = %error, "archive consumer went away");
    Error::Sink(SinkError::Disconnected(error.to_string()))
}

impl IntoResponse for LiveArchive {
    fn into_response(self) -> Response {
        let disposition = format!("attachment; filename=\"{}\"", self.filename);
        let first = Bytes::from(self.first_chunk);
        let rest = ReaderStream::new(self.archive);
        // A read error ends the body abruptly; the client sees a truncated transfer
        let body = futures::stream::once(async move { Ok::<_, io::Error>(first) }).chain(rest);

        (
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            Body::from_stream(body),
        )
            .into_response()
    }
}

/// Restrict `name` to characters that are safe inside a quoted header value
fn attachment_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "archive".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchOutcome, Fetcher};
    use crate::io::MemoryReader;
    use crate::orchestrator::{JobSettings, Orchestrator};
    use crate::source::SourceItem;
    use crate::zip::ArchiveReader;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncRead, ReadBuf};
    use url::Url;

    const BODY_SIZE: usize = 1024 * 1024;
    const PIPE_CAPACITY: usize = 4096;
    /// Bytes the archive writer pulls from a source per step
    const WRITER_CHUNK: usize = 64 * 1024;

    /// Body that counts how many of its bytes have been read
    struct CountingBody {
        inner: Cursor<Vec<u8>>,
        served: Arc<AtomicUsize>,
    }

    impl AsyncRead for CountingBody {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            let before = buf.filled().len();
            let polled = Pin::new(&mut this.inner).poll_read(cx, buf);
            this.served.fetch_add(buf.filled().len() - before, Ordering::SeqCst);
            polled
        }
    }

    #[derive(Default)]
    struct CountingFetcher {
        served: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, item: &SourceItem) -> FetchOutcome {
            FetchOutcome::Fetched {
                name: item.suggested_name.clone(),
                size: Some(BODY_SIZE as u64),
                stream: Box::pin(CountingBody {
                    inner: Cursor::new(vec![7u8; BODY_SIZE]),
                    served: Arc::clone(&self.served),
                }),
            }
        }
    }

    fn start(fetcher: Arc<CountingFetcher>) -> ArchiveStream {
        let settings = JobSettings {
            pipe_capacity: PIPE_CAPACITY,
            compression_level: 0,
            ..JobSettings::default()
        };
        let source = SourceItem::new(
            "0".to_string(),
            Url::parse("https://x/big.bin").unwrap(),
            None,
        );
        Orchestrator::new(fetcher, settings).start(vec![source]).unwrap()
    }

    #[tokio::test]
    async fn paused_reader_stalls_the_source() {
        let fetcher = Arc::new(CountingFetcher::default());
        let live = LiveSink::new("big").open(start(fetcher.clone())).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let served = fetcher.served.load(Ordering::SeqCst);
        assert!(
            served <= PIPE_CAPACITY + FIRST_CHUNK_SIZE + WRITER_CHUNK,
            "source drained {served} bytes while the reader was paused"
        );

        let tracker = live.tracker();
        let mut bytes = Vec::new();
        live.into_reader().read_to_end(&mut bytes).await.unwrap();
        assert_eq!(fetcher.served.load(Ordering::SeqCst), BODY_SIZE);
        assert_eq!(tracker.take_report().unwrap().entries, ["big.bin"]);

        let reader = ArchiveReader::new(Arc::new(MemoryReader::new(bytes)));
        let entries = reader.list_entries().await.unwrap();
        assert_eq!(reader.read_entry(&entries[0]).await.unwrap(), vec![7u8; BODY_SIZE]);
    }

    /// Output whose reader has gone away
    struct ClosedPipe;

    impl AsyncWrite for ClosedPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn closed_output_is_a_disconnect() {
        let fetcher = Arc::new(CountingFetcher::default());
        let live = LiveSink::new("big").open(start(fetcher.clone())).await.unwrap();

        let result = live.copy_to(&mut ClosedPipe).await;
        assert!(matches!(result, Err(Error::Sink(SinkError::Disconnected(_)))));
        // The job was dropped with the archive, long before the body was read
        assert!(fetcher.served.load(Ordering::SeqCst) < BODY_SIZE);
    }

    #[tokio::test]
    async fn copy_to_relays_every_byte() {
        let fetcher = Arc::new(CountingFetcher::default());
        let live = LiveSink::new("big").open(start(fetcher)).await.unwrap();
        let tracker = live.tracker();

        let mut out = Vec::new();
        let copied = live.copy_to(&mut out).await.unwrap();
        assert_eq!(copied, out.len() as u64);
        assert_eq!(tracker.take_report().unwrap().bytes_written, copied);
    }

    #[test]
    fn attachment_names_are_header_safe() {
        assert_eq!(LiveSink::new("bulk-download").filename(), "bulk-download.zip");
        assert_eq!(LiveSink::new("photos.ZIP").filename(), "photos.ZIP");
        assert_eq!(LiveSink::new("my \"files\"/x").filename(), "my__files__x.zip");
        assert_eq!(LiveSink::new("..").filename(), "archive.zip");
        assert_eq!(LiveSink::new("résumé").filename(), "r_sum_.zip");
    }
}
