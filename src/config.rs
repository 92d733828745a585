//! Configuration types for zipgather
//!
//! Every field has a default, so an empty TOML file (or no file at all) yields a
//! working configuration that serves on localhost and shares into `./shared`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Fetch and archive behaviour
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Where durable archives are stored
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Read and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
            key: None,
        })?;
        let config: Config = toml::from_str(&raw).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every job fail or hang
    pub fn validate(&self) -> Result<()> {
        let archive = &self.archive;
        if archive.max_concurrency == 0 {
            return Err(invalid("archive.max_concurrency", "must be at least 1"));
        }
        if archive.compression_level > 9 {
            return Err(invalid("archive.compression_level", "must be between 0 and 9"));
        }
        if archive.pipe_capacity == 0 {
            return Err(invalid("archive.pipe_capacity", "must be greater than 0"));
        }
        if archive.fetch_timeout.is_zero() {
            return Err(invalid("archive.fetch_timeout", "must be greater than 0"));
        }
        if archive.job_deadline.is_zero() {
            return Err(invalid("archive.job_deadline", "must be greater than 0"));
        }

        let base = match &self.storage {
            StorageConfig::Filesystem {
                public_base_url, ..
            } => public_base_url,
            StorageConfig::Http {
                endpoint,
                public_base_url,
                ..
            } => {
                parse_base_url("storage.endpoint", endpoint)?;
                public_base_url
            }
        };
        parse_base_url("storage.public_base_url", base)?;

        Ok(())
    }
}

/// Parse a URL that object keys will be joined onto
pub fn parse_base_url(key: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| invalid(key, &format!("is not a URL: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(invalid(key, "must be a base URL"));
    }
    Ok(url)
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::Config {
        message: format!("{key} {reason}"),
        key: Some(key.to_string()),
    }
}

/// Fetch, compression and backpressure settings for one archive job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Maximum number of sources fetched at the same time (default: 6)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-source bound on connect plus response headers (default: 30 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub fetch_timeout: Duration,

    /// Per-source bound on the gap between two body chunks (default: 60 seconds)
    #[serde(default = "default_read_timeout", with = "duration_serde")]
    pub read_timeout: Duration,

    /// Bound on the whole fetch phase of a job (default: 300 seconds)
    ///
    /// Sources still pending when it expires are logged as timed out and the
    /// archive is finalized with whatever arrived.
    #[serde(default = "default_job_deadline", with = "duration_serde")]
    pub job_deadline: Duration,

    /// Retries for connect and timeout errors before any body byte is read (default: 2)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Deflate level 0-9 (default: 6)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Bytes buffered between the archive writer and the sink (default: 64 KiB)
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,

    /// Extensions written uncompressed because their content already is
    #[serde(default = "default_store_extensions")]
    pub store_extensions: Vec<String>,

    /// User-Agent sent with every fetch
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            fetch_timeout: default_fetch_timeout(),
            read_timeout: default_read_timeout(),
            job_deadline: default_job_deadline(),
            max_retries: default_max_retries(),
            compression_level: default_compression_level(),
            pipe_capacity: default_pipe_capacity(),
            store_extensions: default_store_extensions(),
            user_agent: default_user_agent(),
        }
    }
}

/// HTTP server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the API listens on (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Prefix of the attachment filename offered by live downloads
    #[serde(default = "default_download_name")]
    pub download_name: String,

    /// Prefix of object keys written by share links
    #[serde(default = "default_share_prefix")]
    pub share_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            download_name: default_download_name(),
            share_prefix: default_share_prefix(),
        }
    }
}

/// Object storage backend for durable archives
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Objects are files under `root`, published below `public_base_url`
    Filesystem {
        /// Directory objects are written to
        #[serde(default = "default_storage_root")]
        root: PathBuf,
        /// URL prefix the directory is served under
        #[serde(default = "default_public_base_url")]
        public_base_url: String,
    },
    /// Objects are `PUT` to `endpoint` and published below `public_base_url`
    Http {
        /// Upload endpoint; the object key is appended
        endpoint: String,
        /// URL prefix objects become readable under
        public_base_url: String,
        /// Bearer token for uploads and deletes
        #[serde(default)]
        token: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Filesystem {
            root: default_storage_root(),
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_max_concurrency() -> usize {
    6
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_job_deadline() -> Duration {
    Duration::from_secs(300)
}

fn default_max_retries() -> u32 {
    2
}

fn default_compression_level() -> u32 {
    6
}

fn default_pipe_capacity() -> usize {
    64 * 1024
}

fn default_store_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "zip", "gz", "mp4", "mp3"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_user_agent() -> String {
    concat!("zipgather/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_download_name() -> String {
    "bulk-download".to_string()
}

fn default_share_prefix() -> String {
    "share".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./shared")
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080/shared/".to_string()
}

// Durations are written as whole seconds in the config file
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
