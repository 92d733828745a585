//! Object storage used by durable archives.
//!
//! A store is built once from [`StorageConfig`] and shared by every job as an
//! `Arc<dyn ObjectStore>`; it holds no per-job state.

mod fs;
mod http;

pub use fs::FsObjectStore;
pub use http::HttpObjectStore;

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use url::Url;

use crate::config::{StorageConfig, parse_base_url};
use crate::error::{Result, StorageError};

/// Body of an upload
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// Put-and-publish capability of an object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, reading it to the end, and return its public URL
    ///
    /// Must leave no readable object behind when it returns an error.
    async fn put_object(&self, key: &str, body: ObjectBody) -> std::result::Result<Url, StorageError>;

    /// Remove `key`; removing a missing object is not an error
    async fn delete_object(&self, key: &str) -> std::result::Result<(), StorageError>;
}

/// Build the configured store
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config {
        StorageConfig::Filesystem {
            root,
            public_base_url,
        } => {
            let base = parse_base_url("storage.public_base_url", public_base_url)?;
            Arc::new(FsObjectStore::new(root.clone(), base))
        }
        StorageConfig::Http {
            endpoint,
            public_base_url,
            token,
        } => {
            let endpoint = parse_base_url("storage.endpoint", endpoint)?;
            let base = parse_base_url("storage.public_base_url", public_base_url)?;
            Arc::new(HttpObjectStore::new(endpoint, base, token.clone())?)
        }
    };
    Ok(store)
}

/// Keys are single path segments of `[A-Za-z0-9._-]` that do not start with a dot
pub(crate) fn check_key(key: &str) -> std::result::Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// `base` joined with `key`
pub(crate) fn join_key(base: &Url, key: &str) -> std::result::Result<Url, StorageError> {
    base.join(key).map_err(|e| StorageError::PublicUrl {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
