//! Beehive data API client
//!
//! Queries go to the Sage/Waggle data API as a single windowed POST; the
//! response is newline-delimited JSON and is parsed line by line while the
//! body is still arriving. File content is fetched from the storage URL in
//! each record using HTTP basic auth.

use super::{Catalog, CatalogQuery, ContentStream, FileRecord, RecordStream};
use crate::error::{CatalogError, TransferError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::debug;

// ============================================================================
// Client Constants
// ============================================================================

/// Default Beehive query endpoint
pub const DEFAULT_QUERY_URL: &str = "https://data.sagecontinuum.org/api/v1/query";

/// Default per-request timeout in seconds.
/// Can be overridden via CROCUS_HTTP_TIMEOUT_SECS.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// Longest NDJSON line accepted from the query endpoint
const MAX_RECORD_LINE_BYTES: usize = 1024 * 1024;

/// Beehive account used for authenticated downloads
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Beehive catalog client
pub struct BeehiveClient {
    client: Client,
    query_url: String,
    credentials: Credentials,
}

impl BeehiveClient {
    /// Create a client with the timeout from the environment or the default
    pub fn new(query_url: impl Into<String>, credentials: Credentials) -> Result<Self, CatalogError> {
        let timeout_secs = std::env::var("CROCUS_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        Self::with_timeout(query_url, credentials, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(
        query_url: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(30)))
            .user_agent(concat!("crocus-curator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            query_url: query_url.into(),
            credentials,
        })
    }

    pub fn query_url(&self) -> &str {
        &self.query_url
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    start: String,
    end: String,
    filter: QueryFilter<'a>,
}

#[derive(Debug, Serialize)]
struct QueryFilter<'a> {
    vsn: &'a str,
    upload_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    plugin: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sensor: Option<&'a str>,
}

impl<'a> From<&'a CatalogQuery> for QueryRequest<'a> {
    fn from(query: &'a CatalogQuery) -> Self {
        Self {
            start: query.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            end: query.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            filter: QueryFilter {
                vsn: &query.vsn,
                upload_name: &query.upload_name,
                plugin: query.plugin.as_deref(),
                sensor: query.sensor.as_deref(),
            },
        }
    }
}

/// One NDJSON line of a query response
#[derive(Debug, Deserialize)]
struct RawRecord {
    timestamp: Option<String>,
    value: serde_json::Value,
    #[serde(default)]
    meta: BTreeMap<String, serde_json::Value>,
}

fn parse_record_line(line: &str) -> Result<Option<FileRecord>, CatalogError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let raw: RawRecord = serde_json::from_str(line)
        .map_err(|e| CatalogError::InvalidRecord(format!("{e}: {line}")))?;

    let url = match raw.value {
        serde_json::Value::String(url) => url,
        other => {
            return Err(CatalogError::InvalidRecord(format!(
                "expected a storage URL in 'value', got {other}"
            )))
        },
    };

    let metadata = raw
        .meta
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();

    let mut record = FileRecord::from_url(url, metadata);
    if let Some(at) = raw
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    {
        record = record.with_timestamp(at.with_timezone(&Utc));
    }

    Ok(Some(record))
}

#[async_trait]
impl Catalog for BeehiveClient {
    async fn query(&self, query: &CatalogQuery) -> Result<RecordStream, CatalogError> {
        let request = QueryRequest::from(query);
        debug!(
            url = %self.query_url,
            vsn = %query.vsn,
            upload_name = %query.upload_name,
            start = %request.start,
            end = %request.end,
            "Querying Beehive"
        );

        let response = self.client.post(&self.query_url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let lines = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_RECORD_LINE_BYTES),
        );

        let records = lines
            .map_err(|e| CatalogError::Stream(e.to_string()))
            .try_filter_map(|line| futures::future::ready(parse_record_line(&line)))
            .boxed();

        Ok(records)
    }

    async fn open(&self, record: &FileRecord) -> Result<ContentStream, TransferError> {
        let response = self
            .client
            .get(&record.url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: record.url.clone(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes_stream().map_err(TransferError::from).boxed())
    }
}
