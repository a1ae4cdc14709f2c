//! Destination path policy
//!
//! Maps a (job, file record) pair to the path the file should occupy under
//! the archive root. Pure computation: nothing here touches the filesystem,
//! so the fetcher can always resolve first and then decide whether to skip.
//!
//! Two layouts exist:
//!
//! ```text
//! {root}/foraged-data/{upload_name}/{vsn}-{site}/{subfolder}/{YYYYMM}/{YYYYMMDD}/{filename}
//! {root}/{original_path with mount_dir stripped}
//! ```

use crate::catalog::{FileRecord, META_ORIGINAL_PATH, META_SITE};
use crate::error::ResolveError;
use crate::job::{JobSpec, Layout};
use chrono::NaiveDate;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// Top-level directory for date-grouped output
pub const FORAGED_DATA_DIR: &str = "foraged-data";

/// Compute the destination of `record` for `job` under `root`
pub fn resolve(root: &Path, job: &JobSpec, record: &FileRecord) -> Result<PathBuf, ResolveError> {
    match &job.layout {
        Layout::DateGrouped {
            group_by_date,
            subfolder,
        } => resolve_date_grouped(root, job, record, *group_by_date, subfolder),
        Layout::OriginalPath { mount_dir } => resolve_original_path(root, mount_dir, record),
    }
}

fn resolve_date_grouped(
    root: &Path,
    job: &JobSpec,
    record: &FileRecord,
    group_by_date: bool,
    subfolder: &[String],
) -> Result<PathBuf, ResolveError> {
    let site = job
        .site
        .as_deref()
        .or_else(|| record.meta(META_SITE))
        .ok_or(ResolveError::MissingSite)?;
    if !is_plain_component(site) {
        return Err(ResolveError::InvalidSite {
            site: site.to_string(),
        });
    }

    let mut dir = root
        .join(FORAGED_DATA_DIR)
        .join(&job.upload_name)
        .join(format!("{}-{}", job.vsn, site));
    dir.extend(subfolder);

    let date = job
        .date_pattern
        .as_ref()
        .map(|pattern| extract_date(pattern, &record.name))
        .transpose()?;

    if group_by_date {
        // Job validation guarantees a pattern whenever grouping is on
        if let Some(date) = date {
            dir.push(date.format("%Y%m").to_string());
            dir.push(date.format("%Y%m%d").to_string());
        }
    }

    let file_name = if job.waggle_filename_timestamp {
        record.name.as_str()
    } else {
        strip_timestamp_prefix(&record.name)
    };
    if !is_plain_component(file_name) {
        return Err(ResolveError::InvalidFileName {
            filename: record.name.clone(),
        });
    }

    Ok(dir.join(file_name))
}

/// Whether `name` stays a single directory entry when joined onto a path
fn is_plain_component(name: &str) -> bool {
    !matches!(name, "" | "." | "..") && !name.contains(['/', '\\', '\0'])
}

fn resolve_original_path(
    root: &Path,
    mount_dir: &str,
    record: &FileRecord,
) -> Result<PathBuf, ResolveError> {
    if mount_dir.trim().is_empty() {
        return Err(ResolveError::MissingMountDir);
    }

    let original = record
        .meta(META_ORIGINAL_PATH)
        .ok_or_else(|| ResolveError::MissingOriginalPath {
            filename: record.name.clone(),
        })?;

    // Component-wise: "/data" covers "/data/x.nc" but not "/database/x.nc"
    let relative = Path::new(original)
        .strip_prefix(mount_dir)
        .map_err(|_| ResolveError::OutsideMountDir {
            path: original.to_string(),
            mount_dir: mount_dir.to_string(),
        })?;

    let mut destination = root.to_path_buf();
    let mut segments = 0;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                destination.push(part);
                segments += 1;
            },
            Component::CurDir => {},
            _ => {
                return Err(ResolveError::UnsafeOriginalPath {
                    path: original.to_string(),
                })
            },
        }
    }

    if segments == 0 {
        return Err(ResolveError::UnsafeOriginalPath {
            path: original.to_string(),
        });
    }

    Ok(destination)
}

/// Pull the `YYYYMMDD` token out of a filename with the job's pattern.
///
/// The pattern is searched, not anchored; its single capture group must hold
/// a valid calendar date.
pub fn extract_date(pattern: &Regex, filename: &str) -> Result<NaiveDate, ResolveError> {
    let token = pattern
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| ResolveError::DateNotFound {
            filename: filename.to_string(),
        })?;

    let invalid = || ResolveError::InvalidDate {
        filename: filename.to_string(),
        token: token.to_string(),
    };

    if token.len() != 8 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    NaiveDate::parse_from_str(token, "%Y%m%d").map_err(|_| invalid())
}

/// Drop a leading Waggle upload timestamp (`^\d+-`) from a filename
pub fn strip_timestamp_prefix(name: &str) -> &str {
    match name.split_once('-') {
        Some((prefix, rest))
            if !prefix.is_empty() && !rest.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            rest
        },
        _ => name,
    }
}
