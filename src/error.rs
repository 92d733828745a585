//! Error types for zipgather
//!
//! Per-source fetch failures are deliberately absent from this module: they are
//! values ([`FetchOutcome::Failed`](crate::fetch::FetchOutcome::Failed)) that end
//! up in the archive's error log, never errors that abort a job.

use thiserror::Error;

/// Result type alias for zipgather operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for zipgather
#[derive(Debug, Error)]
pub enum Error {
    /// The caller asked for something that can never succeed (empty source
    /// list, malformed locator, bad request body)
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "archive.max_concurrency")
        key: Option<String>,
    },

    /// Archive writing or reading failed
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// The sink could not deliver the archive
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Object storage failure outside of a running job
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The job was cancelled before it could finish
    #[error("job cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Errors raised while producing or inspecting the ZIP container
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Writing to the archive output failed; the container is unusable
    #[error("failed to write archive: {0}")]
    Write(#[source] std::io::Error),

    /// The deflate encoder rejected its input
    #[error("compression failed for {entry}: {reason}")]
    Compression {
        /// Entry being compressed
        entry: String,
        /// Encoder message
        reason: String,
    },

    /// An archive being read is not a valid ZIP container
    #[error("malformed archive: {0}")]
    Malformed(String),

    /// An entry uses a compression method this crate cannot decode
    #[error("unsupported compression method {method} for {entry}")]
    UnsupportedMethod {
        /// Entry name
        entry: String,
        /// Raw method id from the header
        method: u16,
    },

    /// Decompressed bytes do not match the recorded CRC-32
    #[error("checksum mismatch for {entry}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Entry name
        entry: String,
        /// CRC recorded in the central directory
        expected: u32,
        /// CRC of the bytes actually read
        actual: u32,
    },

    /// Reading an archive from its backing store failed
    #[error("failed to read archive: {0}")]
    Read(#[source] std::io::Error),
}

/// Errors raised by a sink while delivering the finished archive
#[derive(Debug, Error)]
pub enum SinkError {
    /// The live consumer went away before the archive was complete
    #[error("client disconnected: {0}")]
    Disconnected(String),

    /// The archive stream ended without producing any bytes
    #[error("archive stream ended before any data was produced")]
    EmptyStream,

    /// The durable upload failed; any partial object has been discarded
    #[error("upload of {key} failed: {source}")]
    Upload {
        /// Object key the upload was written under
        key: String,
        /// Underlying storage failure
        #[source]
        source: StorageError,
    },

    /// The store acknowledged an upload that did not consume the whole archive
    #[error("upload of {key} finished before the archive was complete")]
    Incomplete {
        /// Object key the upload was written under
        key: String,
    },
}

/// Errors raised by an [`ObjectStore`](crate::storage::ObjectStore)
#[derive(Debug, Error)]
pub enum StorageError {
    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote store rejected the request
    #[error("storage responded with HTTP {status}")]
    Status {
        /// HTTP status code returned by the store
        status: u16,
    },

    /// Transport failure talking to a remote store
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Object key is not acceptable for this store
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Public URL for a stored object could not be built
    #[error("cannot build public URL for {key}: {reason}")]
    PublicUrl {
        /// Object key
        key: String,
        /// Why joining failed
        reason: String,
    },
}

/// Map errors onto HTTP responses
pub trait ToHttpStatus {
    /// HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Machine-readable error code
    fn error_code(&self) -> &'static str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Config { .. } => 500,
            Error::Archive(_) => 500,
            Error::Sink(_) | Error::Storage(_) | Error::Network(_) => 502,
            Error::Cancelled => 503,
            Error::Io(_) => 500,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Config { .. } => "config_error",
            Error::Archive(_) => "archive_error",
            Error::Sink(SinkError::Upload { .. }) => "upload_failed",
            Error::Sink(_) => "sink_error",
            Error::Storage(_) => "storage_error",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
        }
    }
}
