//! HTTP surface for both archive features
//!
//! # Routes
//!
//! - `GET /health` - Health check
//! - `POST /archives/download` - Stream an archive back as an attachment
//! - `POST /archives/share` - Store an archive and return its public URL
//! - `GET <public path>/*` - Stored archives, when storage is the local filesystem

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{Config, StorageConfig, parse_base_url};
use crate::error::{Error, Result, ToHttpStatus};
use crate::fetch::HttpFetcher;
use crate::orchestrator::{FetchFailure, JobSettings, Orchestrator};
use crate::sink::{ArchiveResult, DurableSink, LiveSink, StoredArchive};
use crate::source::{SourceSpec, resolve_sources};
use crate::storage::ObjectStore;

/// Shared state handed to every handler
///
/// Cloned per request; holds no per-job data.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: Arc<dyn ObjectStore>) -> Self {
        Self { config, store }
    }

    /// A fresh orchestrator with its own fetcher and connection pool
    fn orchestrator(&self, max_concurrency: Option<usize>) -> Result<Orchestrator> {
        let fetcher = HttpFetcher::new(&self.config.archive)?;
        let mut settings = JobSettings::from(&self.config.archive);
        if let Some(limit) = max_concurrency {
            settings.max_concurrency = limit.clamp(1, settings.max_concurrency);
        }
        Ok(Orchestrator::new(Arc::new(fetcher), settings))
    }
}

/// Body of `POST /archives/download`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub sources: Vec<SourceSpec>,
    /// Attachment filename; defaults to `server.download_name`
    #[serde(default)]
    pub filename: Option<String>,
    /// Lower the concurrency limit for this job
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Body of `POST /archives/share`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Result of a share request, successful or not
#[derive(Debug, Serialize, Deserialize)]
pub struct ShareResponse {
    pub success: bool,
    #[serde(rename = "publicURL", skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<Vec<FetchFailure>>,
}

impl From<StoredArchive> for ShareResponse {
    fn from(stored: StoredArchive) -> Self {
        Self {
            success: true,
            public_url: Some(stored.public_url.to_string()),
            error: None,
            code: None,
            entries: Some(stored.report.entries),
            failures: Some(stored.report.failures),
        }
    }
}

impl From<&Error> for ShareResponse {
    fn from(error: &Error) -> Self {
        Self {
            success: false,
            public_url: None,
            error: Some(error.to_string()),
            code: Some(error.error_code().to_string()),
            entries: None,
            failures: None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        }
        (status, Json(ShareResponse::from(&self))).into_response()
    }
}

impl IntoResponse for ArchiveResult {
    fn into_response(self) -> Response {
        match self {
            ArchiveResult::Live(archive) => archive.into_response(),
            ArchiveResult::Stored(stored) => Json(ShareResponse::from(stored)).into_response(),
        }
    }
}

/// Build the router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/archives/download", post(download_archive))
        .route("/archives/share", post(share_archive));

    let router = match shared_files(&state.config.storage) {
        Some((path, dir)) => router.nest_service(&path, dir),
        None => router,
    };

    router.with_state(state).layer(TraceLayer::new_for_http())
}

/// Route serving filesystem-stored archives under the path of their public URL
fn shared_files(storage: &StorageConfig) -> Option<(String, ServeDir)> {
    let StorageConfig::Filesystem {
        root,
        public_base_url,
    } = storage
    else {
        return None;
    };
    let base = parse_base_url("storage.public_base_url", public_base_url).ok()?;
    let path = base.path().trim_end_matches('/');
    if path.is_empty() {
        return None;
    }
    Some((path.to_string(), ServeDir::new(root)))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn download_archive(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<ArchiveResult> {
    let Json(request) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    let sources = resolve_sources(request.sources)?;
    let name = request
        .filename
        .as_deref()
        .unwrap_or(&state.config.server.download_name);
    let sink = LiveSink::new(name);

    tracing::info!(sources = sources.len(), filename = sink.filename(), "live archive requested");
    state
        .orchestrator(request.max_concurrency)?
        .assemble(sources, &sink)
        .await
}

async fn share_archive(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ShareRequest>, JsonRejection>,
) -> Result<ArchiveResult> {
    let Json(request) = payload.map_err(|e| Error::Validation(e.body_text()))?;
    let sources = resolve_sources(request.sources)?;
    let sink = DurableSink::new(Arc::clone(&state.store), &state.config.server.share_prefix);

    tracing::info!(sources = sources.len(), "share archive requested");
    state
        .orchestrator(request.max_concurrency)?
        .assemble(sources, &sink)
        .await
}

/// Serve until Ctrl-C
pub async fn start_server(config: Arc<Config>, store: Arc<dyn ObjectStore>) -> Result<()> {
    let bind_address: SocketAddr = config.server.bind_address;
    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(AppState::new(config, store));
    let listener = TcpListener::bind(bind_address).await?;
    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let response = Error::Validation("no sources".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ShareResponse = serde_json::from_slice(&body).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.code.as_deref(), Some("validation_error"));
        assert!(parsed.error.unwrap().contains("no sources"));
    }

    #[tokio::test]
    async fn sink_errors_are_bad_gateway() {
        let response = Error::Sink(SinkError::EmptyStream).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn shared_files_follow_public_path() {
        let storage = StorageConfig::Filesystem {
            root: "./shared".into(),
            public_base_url: "http://127.0.0.1:8080/files/archives/".to_string(),
        };
        let (path, _) = shared_files(&storage).unwrap();
        assert_eq!(path, "/files/archives");

        let at_root = StorageConfig::Filesystem {
            root: "./shared".into(),
            public_base_url: "http://cdn.local/".to_string(),
        };
        assert!(shared_files(&at_root).is_none());
    }
}
