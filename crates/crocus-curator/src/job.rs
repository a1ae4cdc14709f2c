//! Ingest job definitions
//!
//! A job is read from the `jobs` list of the curator config as a loose
//! [`RawJob`] and validated into an immutable [`JobSpec`]. Validation happens
//! before any network traffic so a broken definition is reported up front
//! without affecting its siblings.

use crate::error::ConfigError;
use chrono::{DateTime, NaiveDate, Utc};
use crocus_common::time::{day_window, parse_day};
use regex::Regex;
use serde::Deserialize;
use std::path::{Component, Path};

/// Default file suffix when a job does not set `extension`
pub const DEFAULT_EXTENSION: &str = "nc";

/// Job entry exactly as written in the config file.
///
/// Every field is optional here so that missing fields can be reported by
/// name instead of as a generic parse failure. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJob {
    pub job: Option<String>,
    pub upload_name: Option<String>,
    pub vsn: Option<String>,
    pub site: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub date_pattern: Option<String>,
    pub extension: Option<String>,
    pub subfolder: Option<String>,
    pub group_by_date: Option<bool>,
    pub waggle_filename_timestamp: Option<bool>,
    pub keep_original_path: Option<bool>,
    pub mount_dir: Option<String>,
    pub plugin: Option<String>,
    pub sensor: Option<String>,
}

/// How files are laid out under the root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// `foraged-data/{upload}/{vsn}-{site}/{subfolder}/{YYYYMM}/{YYYYMMDD}/`
    DateGrouped {
        group_by_date: bool,
        subfolder: Vec<String>,
    },
    /// Mirror the on-device path below `mount_dir`
    OriginalPath { mount_dir: String },
}

/// A validated ingest job
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub upload_name: String,
    pub vsn: String,
    pub site: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub date_pattern: Option<Regex>,
    pub extension: String,
    pub waggle_filename_timestamp: bool,
    pub layout: Layout,
    pub plugin: Option<String>,
    pub sensor: Option<String>,
}

impl JobSpec {
    /// Validate a raw job. `today` fills in a missing `end_date`.
    pub fn from_raw(raw: RawJob, today: NaiveDate) -> Result<Self, ConfigError> {
        let name = required(raw.job, "<unnamed>", "job")?;
        let upload_name = required(raw.upload_name, &name, "upload_name")?;
        let vsn = required(raw.vsn, &name, "vsn")?;
        let start_raw = required(raw.start_date, &name, "start_date")?;

        let start_date = parse_day(&start_raw)
            .map_err(|e| ConfigError::invalid(&name, "start_date", e.to_string()))?;
        let end_date = match non_blank(raw.end_date) {
            Some(end) => parse_day(&end)
                .map_err(|e| ConfigError::invalid(&name, "end_date", e.to_string()))?,
            None => today,
        };
        if end_date < start_date {
            return Err(ConfigError::invalid(
                &name,
                "end_date",
                format!("{end_date} is before start_date {start_date}"),
            ));
        }

        let date_pattern = non_blank(raw.date_pattern)
            .map(|p| compile_date_pattern(&name, &p))
            .transpose()?;

        let extension = non_blank(raw.extension)
            .map(|ext| ext.trim_start_matches('.').to_string())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        if extension.is_empty() {
            return Err(ConfigError::invalid(&name, "extension", "must not be only dots"));
        }

        let layout = if raw.keep_original_path.unwrap_or(false) {
            let mount_dir = non_blank(raw.mount_dir)
                .ok_or_else(|| ConfigError::missing(&name, "mount_dir"))?;
            if !Path::new(&mount_dir).is_absolute() {
                return Err(ConfigError::invalid(&name, "mount_dir", "must be an absolute path"));
            }
            Layout::OriginalPath { mount_dir }
        } else {
            let group_by_date = raw.group_by_date.unwrap_or(true);
            if group_by_date && date_pattern.is_none() {
                return Err(ConfigError::invalid(
                    &name,
                    "date_pattern",
                    "required when group_by_date is enabled",
                ));
            }
            let subfolder = non_blank(raw.subfolder)
                .map(|s| split_subfolder(&name, &s))
                .transpose()?
                .unwrap_or_default();
            Layout::DateGrouped {
                group_by_date,
                subfolder,
            }
        };

        Ok(Self {
            name,
            upload_name,
            vsn,
            site: non_blank(raw.site),
            start_date,
            end_date,
            date_pattern,
            extension,
            waggle_filename_timestamp: raw.waggle_filename_timestamp.unwrap_or(true),
            layout,
            plugin: non_blank(raw.plugin),
            sensor: non_blank(raw.sensor),
        })
    }

    /// Whether a remote file name ends in `.{extension}`
    pub fn matches_extension(&self, file_name: &str) -> bool {
        file_name
            .strip_suffix(self.extension.as_str())
            .and_then(|stem| stem.strip_suffix('.'))
            .is_some_and(|stem| !stem.is_empty())
    }

    /// UTC query window covering `start_date` through `end_date` inclusive
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        day_window(self.start_date, self.end_date)
    }

    pub fn keeps_original_path(&self) -> bool {
        matches!(self.layout, Layout::OriginalPath { .. })
    }
}

/// A job definition that failed validation
#[derive(Debug)]
pub struct InvalidJob {
    /// Declared name, or `jobs[N]` when the entry has none
    pub name: String,
    pub error: ConfigError,
}

/// One entry of the config's `jobs` list after validation
#[derive(Debug)]
pub enum JobEntry {
    Valid(JobSpec),
    Invalid(InvalidJob),
}

impl JobEntry {
    pub fn name(&self) -> &str {
        match self {
            JobEntry::Valid(job) => &job.name,
            JobEntry::Invalid(invalid) => &invalid.name,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, job: &str, field: &'static str) -> Result<String, ConfigError> {
    non_blank(value).ok_or_else(|| ConfigError::missing(job, field))
}

fn compile_date_pattern(job: &str, pattern: &str) -> Result<Regex, ConfigError> {
    let regex =
        Regex::new(pattern).map_err(|e| ConfigError::invalid(job, "date_pattern", e.to_string()))?;

    // captures_len counts the implicit whole-match group
    if regex.captures_len() != 2 {
        return Err(ConfigError::invalid(
            job,
            "date_pattern",
            format!(
                "expected exactly one capturing group, found {}",
                regex.captures_len() - 1
            ),
        ));
    }

    Ok(regex)
}

fn split_subfolder(job: &str, subfolder: &str) -> Result<Vec<String>, ConfigError> {
    let mut segments = Vec::new();
    for component in Path::new(subfolder.trim_matches('/')).components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {},
            _ => {
                return Err(ConfigError::invalid(
                    job,
                    "subfolder",
                    "must be a relative path without '..'",
                ))
            },
        }
    }
    Ok(segments)
}
