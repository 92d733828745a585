//! Main entry point for the zipgather CLI application.
//!
//! This binary runs the HTTP API, builds one-off archives from the command
//! line, and lists the contents of archives on disk.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use zipgather::cli::{Cli, Command, ConfigArgs};
use zipgather::server::{self, ShareResponse};
use zipgather::{
    ArchiveReader, Config, DurableSink, HttpFetcher, JobSettings, LiveSink, LocalFileReader,
    Orchestrator, SourceSpec, resolve_sources, storage,
};

/// Application entry point.
///
/// Installs logging, then dispatches to the selected subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { config, bind } => {
            let mut config = load_config(&config)?;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            let store = storage::from_config(&config.storage)?;
            server::start_server(Arc::new(config), store).await?;
        }
        Command::Bundle {
            urls,
            output,
            share,
            jobs,
            config,
        } => {
            let mut config = load_config(&config)?;
            if let Some(jobs) = jobs {
                config.archive.max_concurrency = jobs;
                config.validate()?;
            }
            if share {
                share_bundle(&config, urls).await?;
            } else {
                live_bundle(&config, urls, output.as_deref(), cli.quiet > 0).await?;
            }
        }
        Command::List { file, verbose } => {
            let reader = Arc::new(
                LocalFileReader::new(&file)
                    .with_context(|| format!("cannot open {}", file.display()))?,
            );
            list_files(&ArchiveReader::new(reader), verbose).await?;
        }
    }

    Ok(())
}

/// Load the configuration file if one was given, defaults otherwise.
fn load_config(args: &ConfigArgs) -> Result<Config> {
    match &args.config {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}

fn orchestrator(config: &Config) -> Result<Orchestrator> {
    let fetcher = HttpFetcher::new(&config.archive)?;
    Ok(Orchestrator::new(
        Arc::new(fetcher),
        JobSettings::from(&config.archive),
    ))
}

/// Stream an archive into `output`, or stdout when no file is given.
///
/// A partially written output file is removed if the job fails.
async fn live_bundle(
    config: &Config,
    urls: Vec<String>,
    output: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let sources = resolve_sources(urls.iter().map(|u| SourceSpec::from(u.as_str())).collect())?;
    let name = output
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.server.download_name.clone());
    let sink = LiveSink::new(&name);

    let archive = sink.open(orchestrator(config)?.start(sources)?).await?;
    let tracker = archive.tracker();

    match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?;
            let written = match archive.copy_to(&mut file).await {
                Ok(_) => file.sync_all().await.map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = written {
                remove_partial(path).await;
                return Err(e);
            }
        }
        None => {
            archive.copy_to(&mut tokio::io::stdout()).await?;
        }
    }

    if let Some(report) = tracker.take_report()
        && !quiet
    {
        eprintln!(
            "{} entries, {} failed, {} written",
            report.entries.len(),
            report.failures.len(),
            format_size(report.bytes_written)
        );
        for failure in &report.failures {
            eprintln!("  failed: {} ({})", failure.locator, failure.reason);
        }
    }

    Ok(())
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial output");
    }
}

/// Upload an archive and print the share result as JSON.
async fn share_bundle(config: &Config, urls: Vec<String>) -> Result<()> {
    let sources = resolve_sources(urls.iter().map(|u| SourceSpec::from(u.as_str())).collect())?;
    let store = storage::from_config(&config.storage)?;
    let sink = DurableSink::new(store, config.server.share_prefix.as_str());

    let archive = orchestrator(config)?.start(sources)?;
    let (response, outcome) = match sink.store(archive).await {
        Ok(stored) => (ShareResponse::from(stored), Ok(())),
        Err(e) => (ShareResponse::from(&e), Err(e)),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(outcome?)
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format: Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
async fn list_files(reader: &ArchiveReader<LocalFileReader>, verbose: bool) -> Result<()> {
    let entries = reader.list_entries().await?;

    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        if !verbose {
            println!("{}", entry.file_name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }

    Ok(())
}

/// Space saved by compression, as the `Cmpr` column shows it.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
