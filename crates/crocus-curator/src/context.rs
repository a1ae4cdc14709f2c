//! Per-run context threaded through runner, fetcher and resolver

use crocus_common::time::{Clock, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default number of attempts per file download
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay between download attempts; doubles on each retry
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Switches that change how a run treats files, not which files it finds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Resolve and check existence only; write nothing
    pub dry_run: bool,
    /// Replace files that already exist at the destination
    pub force: bool,
    /// Stop after this many candidate files per job
    pub limit: Option<usize>,
    /// Attempts per download, including the first
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            limit: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Everything a run needs besides the jobs and the catalog
#[derive(Clone)]
pub struct RunContext {
    pub root_dir: PathBuf,
    pub clock: Arc<dyn Clock>,
    pub options: RunOptions,
}

impl RunContext {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            clock: Arc::new(SystemClock),
            options: RunOptions::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Directory receiving per-run log files
    pub fn log_dir(&self) -> PathBuf {
        self.root_dir.join("logs")
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("root_dir", &self.root_dir)
            .field("now", &self.clock.now())
            .field("options", &self.options)
            .finish()
    }
}
