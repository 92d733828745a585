//! # zipgather
//!
//! Fetch a set of remote files concurrently and stream them into one ZIP
//! archive, either straight back to the caller or into object storage.
//!
//! A job takes a non-empty list of [`SourceItem`]s. The [`Orchestrator`] fetches
//! them through a bounded pool, appends each body to the [`ArchiveWriter`] as
//! soon as it arrives, records sources that could not be fetched in an
//! `error_log.txt` entry, and finalizes the archive. A [`Sink`] decides where
//! the bytes go: [`LiveSink`] relays them as they are produced, [`DurableSink`]
//! uploads them and returns a public URL.
//!
//! ## Features
//!
//! - Bounded concurrent fetches with per-source and per-job timeouts
//! - Streaming ZIP output (DEFLATE or STORED, ZIP64) with backpressure
//! - Deterministic renaming of colliding entry names
//! - Filesystem and HTTP object stores for shared archives
//! - An axum HTTP API and a command line front end
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zipgather::{ArchiveResult, Config, HttpFetcher, JobSettings, LiveSink, Orchestrator, SourceSpec, resolve_sources};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let fetcher = HttpFetcher::new(&config.archive)?;
//!     let orchestrator = Orchestrator::new(Arc::new(fetcher), JobSettings::from(&config.archive));
//!
//!     let sources = resolve_sources(vec![
//!         SourceSpec::from("https://example.com/a.png"),
//!         SourceSpec::from("https://example.com/b.pdf"),
//!     ])?;
//!
//!     if let ArchiveResult::Live(archive) = orchestrator.assemble(sources, &LiveSink::new("bundle")).await? {
//!         let mut file = tokio::fs::File::create(archive.filename()).await?;
//!         tokio::io::copy(&mut archive.into_reader(), &mut file).await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod io;
pub mod orchestrator;
pub mod server;
pub mod sink;
pub mod source;
pub mod storage;
pub mod zip;

pub use config::Config;
pub use error::{Error, Result};
pub use fetch::{FetchOutcome, Fetcher, HttpFetcher};
pub use io::{LocalFileReader, ReadAt};
pub use orchestrator::{ArchiveStream, JobReport, JobSettings, Orchestrator};
pub use sink::{ArchiveResult, DurableSink, LiveSink, Sink};
pub use source::{SourceItem, SourceSpec, resolve_sources};
pub use storage::ObjectStore;
pub use zip::{ArchiveReader, ArchiveWriter, ZipFileEntry};
