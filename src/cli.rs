use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "zipgather")]
#[command(version)]
#[command(about = "Fetch remote files concurrently and stream them into one ZIP archive", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipgather bundle https://x/a.png https://x/b.pdf -o out.zip   archive two files into out.zip\n  \
  zipgather bundle --share https://x/a.png                      store the archive, print its URL\n  \
  zipgather list -v out.zip                                     show what an archive contains\n  \
  zipgather serve --config zipgather.toml                       run the HTTP API")]
pub struct Cli {
    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Address to listen on (overrides server.bind_address)
        #[arg(short = 'b', long = "bind", value_name = "ADDR")]
        bind: Option<SocketAddr>,
    },

    /// Build one archive from the given URLs
    Bundle {
        /// URLs of the files to include
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,

        /// Write the archive here instead of stdout
        #[arg(short = 'o', long = "output", value_name = "FILE", conflicts_with = "share")]
        output: Option<PathBuf>,

        /// Upload to the configured storage and print the JSON result
        #[arg(long = "share")]
        share: bool,

        /// Maximum concurrent fetches (overrides archive.max_concurrency)
        #[arg(short = 'j', long = "jobs", value_name = "N")]
        jobs: Option<usize>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// List the entries of a local archive
    List {
        /// ZIP file path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Show sizes, compression ratio and timestamps
        #[arg(short = 'v')]
        verbose: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.is_very_quiet() {
            "zipgather=error"
        } else if self.is_quiet() {
            "zipgather=warn"
        } else {
            "zipgather=info"
        }
    }
}
