#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zipgather::config::ArchiveConfig;

/// Archive settings with timeouts short enough for tests
pub fn fast_archive_config() -> ArchiveConfig {
    ArchiveConfig {
        fetch_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
        job_deadline: Duration::from_secs(10),
        max_retries: 0,
        ..ArchiveConfig::default()
    }
}

/// Serve `body` at `route` with status 200
pub async fn serve_file(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Answer `route` with `status` and no body
pub async fn serve_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Deterministic, poorly compressible test content
pub fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// Every entry of `bytes`, in central directory order, read by the `zip` crate
pub fn unzip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip archive");
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).expect("readable entry");
            let mut data = Vec::new();
            file.read_to_end(&mut data).expect("entry data");
            (file.name().to_string(), data)
        })
        .collect()
}

/// Entry data by name
pub fn entry<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    entries
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, data)| data.as_slice())
        .unwrap_or_else(|| panic!("no entry named {name}"))
}
