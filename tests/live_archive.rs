mod common;

use common::*;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use wiremock::MockServer;
use zipgather::{
    ArchiveResult, Error, HttpFetcher, JobSettings, LiveSink, Orchestrator, SourceSpec,
    resolve_sources,
};

fn orchestrator() -> Orchestrator {
    let config = fast_archive_config();
    let fetcher = HttpFetcher::new(&config).unwrap();
    Orchestrator::new(Arc::new(fetcher), JobSettings::from(&config))
}

fn specs(server: &MockServer, routes: &[&str]) -> Vec<SourceSpec> {
    routes
        .iter()
        .map(|r| SourceSpec::from(format!("{}{r}", server.uri()).as_str()))
        .collect()
}

async fn live_bytes(orchestrator: &Orchestrator, specs: Vec<SourceSpec>) -> Vec<u8> {
    let sources = resolve_sources(specs).unwrap();
    let result = orchestrator
        .assemble(sources, &LiveSink::new("bundle"))
        .await
        .unwrap();
    let ArchiveResult::Live(archive) = result else {
        panic!("live sink returned a stored archive");
    };
    assert_eq!(archive.filename(), "bundle.zip");

    let mut bytes = Vec::new();
    archive.into_reader().read_to_end(&mut bytes).await.unwrap();
    bytes
}

#[tokio::test]
async fn missing_source_becomes_error_log_entry() {
    let server = MockServer::start().await;
    let a = pseudo_random(10 * 1024, 1);
    let c = pseudo_random(5 * 1024, 3);
    serve_file(&server, "/a.png", a.clone()).await;
    serve_status(&server, "/b.pdf", 404).await;
    serve_file(&server, "/c.jpg", c.clone()).await;

    let bytes = live_bytes(
        &orchestrator(),
        specs(&server, &["/a.png", "/b.pdf", "/c.jpg"]),
    )
    .await;

    let entries = unzip(&bytes);
    assert_eq!(entries.len(), 3);
    assert_eq!(entry(&entries, "a.png"), a.as_slice());
    assert_eq!(entry(&entries, "c.jpg"), c.as_slice());
    assert_eq!(entries[2].0, "error_log.txt");
    assert_eq!(
        String::from_utf8(entries[2].1.clone()).unwrap(),
        format!("Failed to download: {}/b.pdf\n", server.uri())
    );
}

#[tokio::test]
async fn every_source_arrives_intact() {
    let server = MockServer::start().await;
    let text = b"hello world\n".repeat(20_000);
    let binary = pseudo_random(300 * 1024, 7);
    serve_file(&server, "/notes.txt", text.clone()).await;
    serve_file(&server, "/blob.bin", binary.clone()).await;
    serve_file(&server, "/empty.txt", Vec::new()).await;

    let bytes = live_bytes(
        &orchestrator(),
        specs(&server, &["/notes.txt", "/blob.bin", "/empty.txt"]),
    )
    .await;

    let entries = unzip(&bytes);
    assert_eq!(entries.len(), 3);
    assert_eq!(entry(&entries, "notes.txt"), text.as_slice());
    assert_eq!(entry(&entries, "blob.bin"), binary.as_slice());
    assert!(entry(&entries, "empty.txt").is_empty());
    // Repetitive text is deflated well below its original size
    assert!(bytes.len() < text.len() / 10 + binary.len() + 4096);
}

#[tokio::test]
async fn colliding_names_get_suffixes() {
    let server = MockServer::start().await;
    serve_file(&server, "/one/report.pdf", b"first".to_vec()).await;
    serve_file(&server, "/two/report.pdf", b"second".to_vec()).await;
    serve_file(&server, "/three/report.pdf", b"third".to_vec()).await;

    let bytes = live_bytes(
        &orchestrator(),
        specs(&server, &["/one/report.pdf", "/two/report.pdf", "/three/report.pdf"]),
    )
    .await;

    let mut names: Vec<String> = unzip(&bytes).into_iter().map(|(n, _)| n).collect();
    names.sort();
    assert_eq!(names, ["report-1.pdf", "report-2.pdf", "report.pdf"]);
}

#[tokio::test]
async fn suggested_names_override_locator() {
    let server = MockServer::start().await;
    serve_file(&server, "/blob/123", b"quarterly".to_vec()).await;

    let spec: SourceSpec = serde_json::from_value(serde_json::json!({
        "url": format!("{}/blob/123", server.uri()),
        "suggestedName": "q3/report.txt",
    }))
    .unwrap();
    let bytes = live_bytes(&orchestrator(), vec![spec]).await;

    let entries = unzip(&bytes);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "q3_report.txt");
}

#[tokio::test]
async fn all_sources_failing_still_succeeds() {
    let server = MockServer::start().await;
    serve_status(&server, "/gone.png", 410).await;
    serve_status(&server, "/broken.pdf", 500).await;

    let bytes = live_bytes(
        &orchestrator(),
        specs(&server, &["/gone.png", "/broken.pdf"]),
    )
    .await;

    let entries = unzip(&bytes);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "error_log.txt");
    let log = String::from_utf8(entries[0].1.clone()).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.lines().next().unwrap().ends_with("/gone.png"));
}

#[tokio::test]
async fn empty_request_is_rejected() {
    let result = resolve_sources(Vec::new());
    assert!(matches!(result, Err(Error::Validation(_))));

    let result = orchestrator().start(Vec::new());
    assert!(matches!(result, Err(Error::Validation(_))));
}
