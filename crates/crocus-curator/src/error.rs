//! Error types for the file curator
//!
//! Errors are split by the layer that raises them so the runner can decide
//! what each one costs: a configuration error disqualifies a job definition,
//! a catalog error or a strict-layout resolution error ends the job, and a
//! transfer error only fails the file being downloaded.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for curator operations
pub type Result<T> = std::result::Result<T, CuratorError>;

/// Top-level error for a job run
#[derive(Error, Debug)]
pub enum CuratorError {
    #[error("Catalog query failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Path resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems with the config file or a job definition
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: '{0}'")]
    FileNotFound(String),

    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Job '{job}' is missing required field '{field}'")]
    MissingField { job: String, field: &'static str },

    #[error("Job '{job}' has an invalid '{field}': {reason}")]
    InvalidField {
        job: String,
        field: &'static str,
        reason: String,
    },

    #[error("Job name '{0}' is declared more than once")]
    DuplicateJob(String),

    #[error("No job named '{0}' in the config")]
    UnknownJob(String),

    #[error("Beehive credentials missing: set 'username'/'password' in the config or CROCUS_USERNAME/CROCUS_PASSWORD")]
    MissingCredentials,
}

impl ConfigError {
    pub fn missing(job: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            job: job.into(),
            field,
        }
    }

    pub fn invalid(job: impl Into<String>, field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            job: job.into(),
            field,
            reason: reason.into(),
        }
    }
}

/// Remote catalog query failures
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Network request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Catalog returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed catalog record: {0}")]
    InvalidRecord(String),

    #[error("Catalog stream interrupted: {0}")]
    Stream(String),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Why a file could not be placed in the archive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no site configured for the job and no 'site' in file metadata")]
    MissingSite,

    #[error("site '{site}' cannot be used as a directory name")]
    InvalidSite { site: String },

    #[error("file name '{filename}' cannot be used in the archive")]
    InvalidFileName { filename: String },

    #[error("date pattern did not match filename '{filename}'")]
    DateNotFound { filename: String },

    #[error("'{token}' extracted from '{filename}' is not a YYYYMMDD date")]
    InvalidDate { filename: String, token: String },

    #[error("original-path layout requires 'mount_dir'")]
    MissingMountDir,

    #[error("file '{filename}' has no 'original_path' metadata")]
    MissingOriginalPath { filename: String },

    #[error("original path '{path}' is not under mount dir '{mount_dir}'")]
    OutsideMountDir { path: String, mount_dir: String },

    #[error("original path '{path}' does not name a file below the mount dir")]
    UnsafeOriginalPath { path: String },
}

impl ResolveError {
    /// Whether this error ends the whole job rather than skipping the file.
    ///
    /// Only original-path layout errors are fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ResolveError::MissingMountDir
                | ResolveError::MissingOriginalPath { .. }
                | ResolveError::OutsideMountDir { .. }
                | ResolveError::UnsafeOriginalPath { .. }
        )
    }
}

/// Failures while downloading one file
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Network request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} while downloading {url}")]
    Status { url: String, status: u16 },

    #[error("Download interrupted: {0}")]
    Interrupted(String),

    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Destination appeared during download: {}", .0.display())]
    AlreadyExists(PathBuf),
}

impl TransferError {
    /// Whether retrying the download could help
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Http(_) | TransferError::Interrupted(_) => true,
            TransferError::Status { status, .. } => *status >= 500 || *status == 429,
            TransferError::Io(_) | TransferError::AlreadyExists(_) => false,
        }
    }
}
