//! CROCUS File Curator
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls sensor files uploaded by Waggle nodes out of the Beehive data
//! catalog and files them into a local archive.
//!
//! # Overview
//!
//! - **Jobs** ([`job`]): one YAML entry per (upload, node, date window)
//! - **Catalog** ([`catalog`]): windowed queries and authenticated downloads
//! - **Resolver** ([`resolver`]): where each file belongs on disk
//! - **Fetcher** ([`fetcher`]): idempotent, atomic downloads
//! - **Runner** ([`runner`]): sequential, isolated execution of every job
//!
//! Running the same config twice never re-downloads a file that is already
//! archived, so the curator can be scheduled as often as needed.

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod job;
pub mod report;
pub mod resolver;
pub mod runner;

// Re-export commonly used types
pub use catalog::{BeehiveClient, Catalog, FileRecord, MemoryCatalog};
pub use config::CuratorConfig;
pub use context::{RunContext, RunOptions};
pub use error::{CuratorError, Result};
pub use job::{JobEntry, JobSpec};
pub use report::{DownloadOutcome, JobReport, RunReport};
pub use runner::JobRunner;

use clap::Parser;
use crocus_common::logging::LogFormat;
use std::path::PathBuf;

/// CROCUS file curator - archive Beehive uploads by node, site and date
#[derive(Parser, Debug)]
#[command(name = "crocus-curator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML file with credentials and job definitions
    #[arg(short, long, env = "CROCUS_CONFIG")]
    pub config: PathBuf,

    /// Archive root; files and run logs are written below it
    #[arg(short, long, env = "CROCUS_ROOT_DIR")]
    pub root_dir: PathBuf,

    /// Run only the job with this name
    #[arg(short, long)]
    pub job: Option<String>,

    /// Resolve destinations and report what would be downloaded
    #[arg(long)]
    pub dry_run: bool,

    /// Process at most one file per job
    #[arg(long, conflicts_with = "limit")]
    pub test_run: bool,

    /// Process at most N files per job
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Replace files that already exist in the archive
    #[arg(short, long)]
    pub force: bool,

    /// Download attempts per file before giving up
    #[arg(long, value_name = "N", env = "CROCUS_MAX_ATTEMPTS", default_value_t = context::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Beehive query endpoint (overrides the config file)
    #[arg(long, value_name = "URL")]
    pub query_url: Option<String>,

    /// Write the run report as JSON to this path
    #[arg(long, value_name = "PATH")]
    pub summary_json: Option<PathBuf>,

    /// Log format for console and file output
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Verbose (debug) logging
    #[arg(short = 'v', long = "debug", alias = "verbose")]
    pub debug: bool,
}

impl Cli {
    /// Run options selected by the command-line flags
    pub fn run_options(&self) -> RunOptions {
        let limit = if self.test_run { Some(1) } else { self.limit };
        RunOptions {
            dry_run: self.dry_run,
            force: self.force,
            limit,
            max_attempts: self.max_attempts.max(1),
            ..RunOptions::default()
        }
    }
}
