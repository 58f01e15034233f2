use clap::{Parser, Subcommand, ValueEnum};
use offline_sync::CacheRole;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "offsync",
    about = "Offsync - keep an offline copy of a web app in sync with its deployed version",
    long_about = "Offsync drives the offline cache and update synchronization engine against a\n\
                  live origin. It pre-caches a deployed version, serves requests from the\n\
                  versioned cache when the network is gone, and watches the version endpoint\n\
                  to move onto a new deploy.",
    version,
    author
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Origin every request is resolved against (overrides the configuration file)
    #[arg(long, global = true, env = "OFFSYNC_ORIGIN")]
    pub origin: Option<String>,

    /// Directory holding the cache and the persisted sync state
    #[arg(long, global = true, env = "OFFSYNC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Timeout in seconds for a control request to the worker
    #[arg(long, global = true, default_value = "120")]
    pub timeout: u64,

    /// Output format
    #[arg(short, long, global = true, default_value = "pretty")]
    pub output: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compare the deployed version with the locally committed one
    Check,

    /// Install and activate a version so it is available offline
    Warm {
        /// Version to activate (defaults to the deployed version)
        version: Option<String>,

        /// Re-fetch every resource of the active version in place
        #[arg(long, conflicts_with = "version")]
        refresh: bool,
    },

    /// Show the active version and the cache contents
    Status {
        /// Only report this namespace role
        #[arg(long)]
        role: Option<CacheRole>,
    },

    /// Delete every cache namespace and the persisted sync state
    Clear,

    /// Fetch a path the way the page would
    Fetch {
        /// Path relative to the origin (e.g. "/api/modules/3")
        path: String,

        /// Pretend the network is unreachable
        #[arg(long)]
        offline: bool,

        /// Print the response body
        #[arg(short, long)]
        body: bool,
    },

    /// Watch for new deploys and apply them
    Watch {
        /// Apply an available update without waiting for confirmation
        #[arg(long)]
        auto_accept: bool,
    },

    /// Show configuration information
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human readable output
    #[default]
    Pretty,
    /// JSON output
    Json,
}
