mod common;

use common::*;
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zipgather::error::{SinkError, StorageError};
use zipgather::storage::{FsObjectStore, HttpObjectStore};
use zipgather::{
    ArchiveResult, DurableSink, Error, HttpFetcher, JobSettings, Orchestrator, SourceSpec,
    resolve_sources,
};

fn orchestrator() -> Orchestrator {
    let config = fast_archive_config();
    Orchestrator::new(
        Arc::new(HttpFetcher::new(&config).unwrap()),
        JobSettings::from(&config),
    )
}

async fn sources_server() -> MockServer {
    let server = MockServer::start().await;
    serve_file(&server, "/a.png", pseudo_random(10 * 1024, 11)).await;
    serve_status(&server, "/b.pdf", 404).await;
    serve_file(&server, "/c.jpg", pseudo_random(5 * 1024, 13)).await;
    server
}

fn specs(server: &MockServer) -> Vec<SourceSpec> {
    ["/a.png", "/b.pdf", "/c.jpg"]
        .iter()
        .map(|r| SourceSpec::from(format!("{}{r}", server.uri()).as_str()))
        .collect()
}

#[tokio::test]
async fn filesystem_share_publishes_complete_archive() {
    let sources = sources_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsObjectStore::new(
        dir.path(),
        Url::parse("https://files.example/shared/").unwrap(),
    ));
    let sink = DurableSink::new(store, "share");

    let result = orchestrator()
        .assemble(resolve_sources(specs(&sources)).unwrap(), &sink)
        .await
        .unwrap();
    let ArchiveResult::Stored(stored) = result else {
        panic!("durable sink returned a live archive");
    };

    assert!(stored.key.starts_with("share-") && stored.key.ends_with(".zip"));
    assert_eq!(
        stored.public_url.as_str(),
        format!("https://files.example/shared/{}", stored.key)
    );
    assert_eq!(stored.report.entries.len(), 2);
    assert_eq!(stored.report.failures.len(), 1);
    assert_eq!(stored.report.failures[0].reason, "HTTP 404 Not Found");

    let bytes = std::fs::read(dir.path().join(&stored.key)).unwrap();
    let entries = unzip(&bytes);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].0, "error_log.txt");
    // Only the published object remains; no partial files
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn http_share_uploads_whole_archive() {
    let sources = sources_server().await;
    let storage = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/bucket/share-\d{8}T\d{6}-[0-9a-f]{8}\.zip$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&storage)
        .await;

    let store = Arc::new(
        HttpObjectStore::new(
            Url::parse(&format!("{}/bucket/", storage.uri())).unwrap(),
            Url::parse("https://cdn.example/bucket/").unwrap(),
            None,
        )
        .unwrap(),
    );
    let stored = DurableSink::new(store, "share")
        .store(
            orchestrator()
                .start(resolve_sources(specs(&sources)).unwrap())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(stored.public_url.as_str().starts_with("https://cdn.example/bucket/share-"));

    let requests = storage.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let uploaded = &requests[0].body;
    assert_eq!(uploaded.len() as u64, stored.report.bytes_written);
    let entries = unzip(uploaded);
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"a.png") && names.contains(&"c.jpg"));
    assert_eq!(names.last(), Some(&"error_log.txt"));
}

#[tokio::test]
async fn rejected_upload_fails_job_and_deletes_object() {
    let sources = sources_server().await;
    let storage = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&storage)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/bucket/share-.*\.zip$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&storage)
        .await;

    let store = Arc::new(
        HttpObjectStore::new(
            Url::parse(&format!("{}/bucket/", storage.uri())).unwrap(),
            Url::parse("https://cdn.example/bucket/").unwrap(),
            Some("token".to_string()),
        )
        .unwrap(),
    );
    let result = orchestrator()
        .assemble(
            resolve_sources(specs(&sources)).unwrap(),
            &DurableSink::new(store, "share"),
        )
        .await;

    match result {
        Err(Error::Sink(SinkError::Upload { key, source })) => {
            assert!(key.starts_with("share-"));
            assert!(matches!(source, StorageError::Status { status: 403 }));
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("upload should have failed"),
    }
}
