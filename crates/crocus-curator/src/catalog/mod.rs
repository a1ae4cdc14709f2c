//! Remote file catalog
//!
//! A catalog answers "which files did plugin X upload from node Y between
//! these instants" with a lazy, single-pass stream of [`FileRecord`]s, and
//! hands out the content of a record only when asked. The Beehive data API
//! is the production implementation; [`memory::MemoryCatalog`] serves tests.

pub mod beehive;
pub mod memory;

pub use beehive::BeehiveClient;
pub use memory::MemoryCatalog;

use crate::error::{CatalogError, TransferError};
use crate::job::JobSpec;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use std::collections::BTreeMap;

/// Metadata key holding the site label of the uploading node
pub const META_SITE: &str = "site";

/// Metadata key holding the file's path on the source device
pub const META_ORIGINAL_PATH: &str = "original_path";

/// Lazy sequence of query results. Dropping it releases the connection.
pub type RecordStream = BoxStream<'static, Result<FileRecord, CatalogError>>;

/// File content, streamed in chunks
pub type ContentStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Parameters of one windowed catalog query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogQuery {
    pub upload_name: String,
    pub vsn: String,
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
    pub plugin: Option<String>,
    pub sensor: Option<String>,
}

impl CatalogQuery {
    /// Single query spanning the job's whole window
    pub fn for_job(job: &JobSpec) -> Self {
        let (start, end) = job.window();
        Self {
            upload_name: job.upload_name.clone(),
            vsn: job.vsn.clone(),
            start,
            end,
            plugin: job.plugin.clone(),
            sensor: job.sensor.clone(),
        }
    }

    /// Whether a timestamp falls inside `[start, end)`
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// One uploaded file as listed by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// File name as stored remotely (last segment of the storage URL)
    pub name: String,
    /// Storage URL of the content
    pub url: String,
    /// Upload time, when the catalog reports one
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl FileRecord {
    /// Build a record whose name is taken from the storage URL
    pub fn from_url(url: impl Into<String>, metadata: BTreeMap<String, String>) -> Self {
        let url = url.into();
        Self {
            name: file_name_from_url(&url).to_string(),
            url,
            timestamp: None,
            metadata,
        }
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    /// Metadata value, ignoring blank entries
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Last path segment of a URL, without query string or fragment
pub fn file_name_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Source of file records and their content
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Run one windowed query. An empty stream is not an error.
    async fn query(&self, query: &CatalogQuery) -> Result<RecordStream, CatalogError>;

    /// Open the content of a record for streaming
    async fn open(&self, record: &FileRecord) -> Result<ContentStream, TransferError>;
}
