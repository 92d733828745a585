use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use url::Url;

use super::{ObjectBody, ObjectStore, check_key, join_key};
use crate::error::StorageError;

/// Stores objects as files in one directory
///
/// Uploads land in a hidden `.<key>.partial` file that is renamed into place
/// only after it has been fully written and synced, so a reader never sees a
/// partial archive under its final name.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: Url,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Url) -> Self {
        Self {
            root: root.into(),
            public_base_url,
        }
    }

    /// Directory objects are written to
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partial_path(&self, key: &str) -> PathBuf {
        self.root.join(format!(".{key}.partial"))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(&self, key: &str, mut body: ObjectBody) -> Result<Url, StorageError> {
        check_key(key)?;
        let public_url = join_key(&self.public_base_url, key)?;
        fs::create_dir_all(&self.root).await?;

        let partial = self.partial_path(key);
        let written = match write_synced(&partial, &mut body).await {
            Ok(written) => written,
            Err(e) => {
                remove_if_present(&partial).await;
                return Err(e.into());
            }
        };

        if let Err(e) = fs::rename(&partial, self.root.join(key)).await {
            remove_if_present(&partial).await;
            return Err(e.into());
        }

        tracing::debug!(key, bytes = written, "object stored");
        Ok(public_url)
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        check_key(key)?;
        for path in [self.root.join(key), self.partial_path(key)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

async fn write_synced(path: &Path, body: &mut ObjectBody) -> io::Result<u64> {
    let mut file = File::create(path).await?;
    let written = tokio::io::copy(body, &mut file).await?;
    file.sync_all().await?;
    Ok(written)
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove partial object");
        }
    }
}
