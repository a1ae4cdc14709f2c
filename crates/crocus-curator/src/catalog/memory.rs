//! In-memory catalog
//!
//! Serves a fixed set of records and contents without any network. Used by
//! the test suites to drive the fetcher and runner deterministically,
//! including failure modes that are awkward to provoke over HTTP.

use super::{Catalog, CatalogQuery, ContentStream, FileRecord, RecordStream};
use crate::error::{CatalogError, TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
enum Content {
    Complete(Bytes),
    /// Yields the prefix, then fails as if the connection dropped
    Interrupted(Bytes),
    /// Opening the content fails with this HTTP status
    Status(u16),
}

#[derive(Debug, Clone)]
struct Entry {
    upload_name: String,
    vsn: String,
    record: FileRecord,
    content: Content,
}

/// Catalog backed by a list of records held in memory
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: Vec<Entry>,
    unavailable: BTreeMap<String, String>,
    opened: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file with complete content
    pub fn with_file(
        mut self,
        upload_name: &str,
        vsn: &str,
        record: FileRecord,
        content: impl Into<Bytes>,
    ) -> Self {
        self.push(upload_name, vsn, record, Content::Complete(content.into()));
        self
    }

    /// Add a file whose transfer breaks after `prefix` has been sent
    pub fn with_interrupted_file(
        mut self,
        upload_name: &str,
        vsn: &str,
        record: FileRecord,
        prefix: impl Into<Bytes>,
    ) -> Self {
        self.push(upload_name, vsn, record, Content::Interrupted(prefix.into()));
        self
    }

    /// Add a file whose download answers with an HTTP error status
    pub fn with_failing_file(mut self, upload_name: &str, vsn: &str, record: FileRecord, status: u16) -> Self {
        self.push(upload_name, vsn, record, Content::Status(status));
        self
    }

    /// Make every query for `upload_name` fail
    pub fn with_unavailable_upload(mut self, upload_name: &str, reason: &str) -> Self {
        self.unavailable
            .insert(upload_name.to_string(), reason.to_string());
        self
    }

    /// Number of times content has been opened
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn push(&mut self, upload_name: &str, vsn: &str, record: FileRecord, content: Content) {
        self.entries.push(Entry {
            upload_name: upload_name.to_string(),
            vsn: vsn.to_string(),
            record,
            content,
        });
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn query(&self, query: &CatalogQuery) -> Result<RecordStream, CatalogError> {
        if let Some(reason) = self.unavailable.get(&query.upload_name) {
            return Err(CatalogError::Unavailable(reason.clone()));
        }

        let records: Vec<Result<FileRecord, CatalogError>> = self
            .entries
            .iter()
            .filter(|e| e.upload_name == query.upload_name && e.vsn == query.vsn)
            .filter(|e| e.record.timestamp.is_none_or(|at| query.contains(at)))
            .map(|e| Ok(e.record.clone()))
            .collect();

        Ok(futures::stream::iter(records).boxed())
    }

    async fn open(&self, record: &FileRecord) -> Result<ContentStream, TransferError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let entry = self
            .entries
            .iter()
            .find(|e| e.record.url == record.url)
            .ok_or_else(|| TransferError::Status {
                url: record.url.clone(),
                status: 404,
            })?;

        let chunks: Vec<Result<Bytes, TransferError>> = match &entry.content {
            Content::Complete(bytes) => vec![Ok(bytes.clone())],
            Content::Interrupted(prefix) => vec![
                Ok(prefix.clone()),
                Err(TransferError::Interrupted("connection reset by peer".into())),
            ],
            Content::Status(status) => {
                return Err(TransferError::Status {
                    url: record.url.clone(),
                    status: *status,
                })
            },
        };

        Ok(futures::stream::iter(chunks).boxed())
    }
}
