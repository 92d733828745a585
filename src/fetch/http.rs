use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, Response};
use std::io;
use std::time::Duration;
use tokio_util::io::StreamReader;

use super::{FetchOutcome, Fetcher};
use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::source::SourceItem;

/// Base delay between connection retries; attempt `n` waits `n` times this
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Fetches sources over HTTP(S) with a bounded header wait and idle read timeout
pub struct HttpFetcher {
    client: Client,
    fetch_timeout: Duration,
    max_retries: u32,
}

impl HttpFetcher {
    /// Build a fetcher with its own connection pool
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.fetch_timeout)
            .read_timeout(config.read_timeout)
            .build()?;

        Ok(Self {
            client,
            fetch_timeout: config.fetch_timeout,
            max_retries: config.max_retries,
        })
    }

    /// Send the GET, retrying connection failures and timeouts
    ///
    /// Retries stop as soon as a response arrives; a body is never re-requested.
    async fn open(&self, item: &SourceItem) -> std::result::Result<Response, String> {
        let mut retry_count = 0;

        loop {
            let request = self.client.get(item.locator.clone()).send();
            let result = match tokio::time::timeout(self.fetch_timeout, request).await {
                Ok(result) => result.map_err(Attempt::from),
                Err(_) => Err(Attempt::Retryable("timeout".to_string())),
            };

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => return Err(format!("HTTP {}", resp.status())),
                Err(Attempt::Retryable(reason)) if retry_count < self.max_retries => {
                    retry_count += 1;
                    tracing::debug!(
                        locator = %item.locator,
                        retry = retry_count,
                        max_retries = self.max_retries,
                        %reason,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * retry_count).await;
                }
                Err(Attempt::Retryable(reason)) | Err(Attempt::Fatal(reason)) => {
                    return Err(reason);
                }
            }
        }
    }
}

enum Attempt {
    Retryable(String),
    Fatal(String),
}

impl From<reqwest::Error> for Attempt {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Attempt::Retryable("timeout".to_string())
        } else if e.is_connect() {
            Attempt::Retryable(format!("connection failed: {e}"))
        } else {
            Attempt::Fatal(e.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, item: &SourceItem) -> FetchOutcome {
        match self.open(item).await {
            Ok(resp) => {
                let size = resp.content_length();
                let body = resp.bytes_stream().map_err(io::Error::other);
                FetchOutcome::Fetched {
                    name: item.suggested_name.clone(),
                    stream: Box::pin(StreamReader::new(body)),
                    size,
                }
            }
            Err(reason) => {
                tracing::warn!(id = %item.id, locator = %item.locator, %reason, "fetch failed");
                FetchOutcome::failed(item, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> ArchiveConfig {
        ArchiveConfig {
            fetch_timeout: Duration::from_millis(300),
            max_retries: 1,
            ..ArchiveConfig::default()
        }
    }

    fn item(server: &MockServer, file: &str) -> SourceItem {
        let locator = Url::parse(&format!("{}/{file}", server.uri())).unwrap();
        SourceItem::new("1", locator, None)
    }

    #[tokio::test]
    async fn success_streams_body_and_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 10 * 1024]))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config()).unwrap();
        match fetcher.fetch(&item(&server, "a.png")).await {
            FetchOutcome::Fetched {
                name,
                mut stream,
                size,
            } => {
                assert_eq!(name, "a.png");
                assert_eq!(size, Some(10 * 1024));
                let mut body = Vec::new();
                stream.read_to_end(&mut body).await.unwrap();
                assert_eq!(body, vec![7u8; 10 * 1024]);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_is_a_failed_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/b.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config()).unwrap();
        match fetcher.fetch(&item(&server, "b.pdf")).await {
            FetchOutcome::Failed { locator, reason } => {
                assert!(locator.as_str().ends_with("/b.pdf"));
                assert_eq!(reason, "HTTP 404 Not Found");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_headers_time_out_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.bin"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config()).unwrap();
        match fetcher.fetch(&item(&server, "slow.bin")).await {
            FetchOutcome::Failed { reason, .. } => assert_eq!(reason, "timeout"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_fails_without_panicking() {
        let fetcher = HttpFetcher::new(&ArchiveConfig {
            max_retries: 0,
            ..config()
        })
        .unwrap();
        let locator = Url::parse("http://127.0.0.1:9/nothing.txt").unwrap();
        let outcome = fetcher.fetch(&SourceItem::new("x", locator, None)).await;
        assert!(matches!(outcome, FetchOutcome::Failed { .. }));
    }
}
