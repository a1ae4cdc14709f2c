//! Per-file outcomes and per-job / per-run summaries

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Exit code when every selected job ran to completion
pub const EXIT_OK: i32 = 0;

/// Exit code when at least one job hit a fatal error
pub const EXIT_JOB_FAILED: i32 = 1;

/// Exit code for configuration problems (bad config, invalid job, unknown job)
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// What happened to one candidate file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Saved { path: PathBuf, bytes: u64 },
    /// Dry run: destination is free and the file would be downloaded
    WouldSave { path: PathBuf },
    SkippedExisting { path: PathBuf },
    SkippedInvalid { reason: String },
    Failed {
        path: Option<PathBuf>,
        reason: String,
    },
}

impl DownloadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DownloadOutcome::Saved { .. } => "saved",
            DownloadOutcome::WouldSave { .. } => "would_save",
            DownloadOutcome::SkippedExisting { .. } => "skipped_existing",
            DownloadOutcome::SkippedInvalid { .. } => "skipped_invalid",
            DownloadOutcome::Failed { .. } => "failed",
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            DownloadOutcome::Saved { path, .. }
            | DownloadOutcome::WouldSave { path }
            | DownloadOutcome::SkippedExisting { path } => Some(path),
            DownloadOutcome::Failed { path, .. } => path.as_deref(),
            DownloadOutcome::SkippedInvalid { .. } => None,
        }
    }
}

/// Outcome tagged with the remote file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub file: String,
    #[serde(flatten)]
    pub outcome: DownloadOutcome,
}

/// Outcome counts for one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub saved: usize,
    pub would_save: usize,
    pub skipped_existing: usize,
    pub skipped_invalid: usize,
    pub failed: usize,
}

impl JobSummary {
    pub fn record(&mut self, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Saved { .. } => self.saved += 1,
            DownloadOutcome::WouldSave { .. } => self.would_save += 1,
            DownloadOutcome::SkippedExisting { .. } => self.skipped_existing += 1,
            DownloadOutcome::SkippedInvalid { .. } => self.skipped_invalid += 1,
            DownloadOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_existing + self.skipped_invalid
    }

    pub fn total(&self) -> usize {
        self.saved + self.would_save + self.skipped() + self.failed
    }
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    /// Catalog failure, strict-layout violation or other job-ending error
    Fatal { error: String },
    /// The job definition itself was rejected; nothing was queried
    Invalid { error: String },
}

/// Result of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    #[serde(flatten)]
    pub status: JobStatus,
    pub summary: JobSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files: Vec<FileOutcome>,
}

impl JobReport {
    pub fn new(name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            status: JobStatus::Running,
            summary: JobSummary::default(),
            started_at,
            finished_at: None,
            files: Vec::new(),
        }
    }

    /// Report for a job definition rejected at load time
    pub fn invalid(name: impl Into<String>, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut report = Self::new(name, at);
        report.status = JobStatus::Invalid {
            error: error.into(),
        };
        report.finished_at = Some(at);
        report
    }

    pub fn record(&mut self, file: impl Into<String>, outcome: DownloadOutcome) {
        self.summary.record(&outcome);
        self.files.push(FileOutcome {
            file: file.into(),
            outcome,
        });
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(at);
    }

    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
        self.status = JobStatus::Fatal {
            error: error.into(),
        };
        self.finished_at = Some(at);
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.status, JobStatus::Fatal { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.status, JobStatus::Invalid { .. })
    }
}

/// Result of a whole curator run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub jobs: Vec<JobReport>,
    /// Problems that are not tied to a single job, e.g. an unknown `--job`
    pub config_errors: Vec<String>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            finished_at: None,
            dry_run,
            jobs: Vec::new(),
            config_errors: Vec::new(),
        }
    }

    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn has_fatal(&self) -> bool {
        self.jobs.iter().any(JobReport::is_fatal)
    }

    pub fn has_config_errors(&self) -> bool {
        !self.config_errors.is_empty() || self.jobs.iter().any(JobReport::is_invalid)
    }

    /// Process exit code for the scheduler.
    ///
    /// Skipped or failed files never change the exit code; only fatal job
    /// errors and configuration problems do.
    pub fn exit_code(&self) -> i32 {
        if self.has_fatal() {
            EXIT_JOB_FAILED
        } else if self.has_config_errors() {
            EXIT_CONFIG_ERROR
        } else {
            EXIT_OK
        }
    }

    /// Write the report as pretty JSON
    pub fn save_json(&self, path: impl AsRef<Path>) -> crate::error::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
