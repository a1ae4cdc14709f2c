//! Idempotent fetcher
//!
//! Runs one job against a [`Catalog`]: lists candidates, filters them,
//! resolves every destination and only then starts writing. Files whose
//! destination already exists are never re-downloaded and never opened.
//!
//! Downloads land in a hidden `.part` file next to the destination and are
//! renamed into place once complete, so an interrupted transfer never leaves
//! a file at the final path.

use crate::catalog::{Catalog, CatalogQuery, FileRecord};
use crate::context::RunContext;
use crate::error::{Result, TransferError};
use crate::job::JobSpec;
use crate::report::{DownloadOutcome, JobReport};
use crate::resolver;
use futures::TryStreamExt;
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Executes jobs against a catalog using the settings of one run
pub struct Fetcher<'a> {
    catalog: &'a dyn Catalog,
    ctx: &'a RunContext,
}

impl<'a> Fetcher<'a> {
    pub fn new(catalog: &'a dyn Catalog, ctx: &'a RunContext) -> Self {
        Self { catalog, ctx }
    }

    /// Run `job`, recording each file's outcome into `report`.
    ///
    /// Returns an error only for job-ending conditions: the catalog query
    /// failing or an original-path layout violation. In the latter case no
    /// file of the job has been written.
    pub async fn run(&self, job: &JobSpec, report: &mut JobReport) -> Result<()> {
        let candidates = self.collect_candidates(job).await?;
        let planned = self.plan(job, candidates, report)?;

        for (record, destination) in planned {
            let outcome = self.fetch(&record, destination).await;
            log_outcome(&record.name, &outcome);
            report.record(record.name, outcome);
        }

        Ok(())
    }

    /// Query the catalog and keep the records this job should consider
    async fn collect_candidates(&self, job: &JobSpec) -> Result<Vec<FileRecord>> {
        let query = CatalogQuery::for_job(job);
        info!(
            upload_name = %query.upload_name,
            vsn = %query.vsn,
            start = %query.start,
            end = %query.end,
            "Querying catalog"
        );

        let mut records = self.catalog.query(&query).await?;
        let limit = self.ctx.options.limit;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut listed = 0usize;

        loop {
            if limit.is_some_and(|limit| candidates.len() >= limit) {
                debug!(limit = ?limit, "Candidate limit reached");
                break;
            }
            let Some(record) = records.try_next().await? else {
                break;
            };
            listed += 1;

            if !job.matches_extension(&record.name) {
                debug!(file = %record.name, extension = %job.extension, "Excluded by extension filter");
                continue;
            }
            if !seen.insert(record.url.clone()) {
                debug!(url = %record.url, "Duplicate catalog record");
                continue;
            }
            candidates.push(record);
        }

        info!(listed, candidates = candidates.len(), "Catalog query complete");
        Ok(candidates)
    }

    /// Resolve every candidate before anything is written
    fn plan(
        &self,
        job: &JobSpec,
        candidates: Vec<FileRecord>,
        report: &mut JobReport,
    ) -> Result<Vec<(FileRecord, PathBuf)>> {
        let mut planned = Vec::with_capacity(candidates.len());

        for record in candidates {
            match resolver::resolve(&self.ctx.root_dir, job, &record) {
                Ok(destination) => planned.push((record, destination)),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    let outcome = DownloadOutcome::SkippedInvalid {
                        reason: e.to_string(),
                    };
                    log_outcome(&record.name, &outcome);
                    report.record(record.name, outcome);
                },
            }
        }

        Ok(planned)
    }

    async fn fetch(&self, record: &FileRecord, destination: PathBuf) -> DownloadOutcome {
        let options = &self.ctx.options;

        match tokio::fs::try_exists(&destination).await {
            Ok(true) if !options.force => {
                return DownloadOutcome::SkippedExisting { path: destination }
            },
            Ok(_) => {},
            Err(e) => {
                return DownloadOutcome::Failed {
                    path: Some(destination),
                    reason: format!("cannot check destination: {e}"),
                }
            },
        }

        if options.dry_run {
            return DownloadOutcome::WouldSave { path: destination };
        }

        let max_attempts = options.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.download(record, &destination).await {
                Ok(bytes) => {
                    return DownloadOutcome::Saved {
                        path: destination,
                        bytes,
                    }
                },
                Err(TransferError::AlreadyExists(_)) => {
                    return DownloadOutcome::SkippedExisting { path: destination }
                },
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = options
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        file = %record.name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Download failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => {
                    return DownloadOutcome::Failed {
                        path: Some(destination),
                        reason: e.to_string(),
                    }
                },
            }
        }
    }

    /// Stream one file into a temporary sibling and move it into place
    async fn download(&self, record: &FileRecord, destination: &Path) -> std::result::Result<u64, TransferError> {
        let dir = destination.parent().ok_or_else(|| {
            TransferError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("destination {} has no parent directory", destination.display()),
            ))
        })?;

        let mut content = self.catalog.open(record).await?;

        tokio::fs::create_dir_all(dir).await?;
        let mut part = tempfile::Builder::new()
            .prefix(&part_prefix(&record.name))
            .suffix(".part")
            .tempfile_in(dir)?;

        let mut written = 0u64;
        while let Some(chunk) = content.try_next().await? {
            part.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        part.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            part.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }

        if self.ctx.options.force {
            part.persist(destination).map_err(|e| TransferError::Io(e.error))?;
        } else {
            part.persist_noclobber(destination).map_err(|e| {
                if e.error.kind() == io::ErrorKind::AlreadyExists {
                    TransferError::AlreadyExists(destination.to_path_buf())
                } else {
                    TransferError::Io(e.error)
                }
            })?;
        }

        Ok(written)
    }
}

/// Longest slice of the remote name kept in a partial file's name
const PART_NAME_MAX: usize = 64;

/// Hidden prefix for a partial download, short enough that the random
/// suffix still fits whenever the final name does.
fn part_prefix(name: &str) -> String {
    let mut end = name.len().min(PART_NAME_MAX);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!(".{}.", &name[..end])
}

fn log_outcome(file: &str, outcome: &DownloadOutcome) {
    let label = outcome.label();
    let path = outcome
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    match outcome {
        DownloadOutcome::Saved { bytes, .. } => {
            info!(file, outcome = label, path = %path, bytes, "Saved");
        },
        DownloadOutcome::WouldSave { .. } => {
            info!(file, outcome = label, path = %path, "Dry run: would download");
        },
        DownloadOutcome::SkippedExisting { .. } => {
            info!(file, outcome = label, path = %path, "Skipping, already archived");
        },
        DownloadOutcome::SkippedInvalid { reason } => {
            warn!(file, outcome = label, reason = %reason, "Skipping file");
        },
        DownloadOutcome::Failed { reason, .. } => {
            error!(file, outcome = label, path = %path, reason = %reason, "Download failed");
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::context::{RunOptions, DEFAULT_MAX_ATTEMPTS};
    use crate::job::RawJob;
    use crate::report::JobStatus;
    use chrono::{NaiveDate, TimeZone, Utc};
    use crocus_common::time::FixedClock;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    const UPLOAD: &str = "cl61_files";
    const VSN: &str = "W09A";

    fn cl61_job() -> JobSpec {
        cl61_job_with(RawJob::default())
    }

    fn cl61_job_with(overrides: RawJob) -> JobSpec {
        let raw = RawJob {
            job: Some("cl61".into()),
            upload_name: Some(UPLOAD.into()),
            vsn: Some(VSN.into()),
            site: Some("ATMOS".into()),
            start_date: Some("2025-05-09".into()),
            end_date: Some("2025-05-09".into()),
            date_pattern: Some(r"_(\d{8})_\d{6}".into()),
            ..overrides
        };
        JobSpec::from_raw(raw, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()).unwrap()
    }

    fn record(name: &str) -> FileRecord {
        record_with_meta(name, &[])
    }

    fn record_with_meta(name: &str, meta: &[(&str, &str)]) -> FileRecord {
        let metadata: BTreeMap<String, String> = meta
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FileRecord::from_url(format!("mem://storage/{VSN}/{name}"), metadata)
            .with_timestamp(Utc.with_ymd_and_hms(2025, 5, 9, 8, 53, 40).unwrap())
    }

    fn context(root: &Path, options: RunOptions) -> RunContext {
        RunContext::new(root)
            .with_clock(Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap(),
            )))
            .with_options(RunOptions {
                retry_backoff: Duration::ZERO,
                ..options
            })
    }

    async fn run(catalog: &MemoryCatalog, ctx: &RunContext, job: &JobSpec) -> (JobReport, Result<()>) {
        let mut report = JobReport::new(&job.name, ctx.clock.now());
        let result = Fetcher::new(catalog, ctx).run(job, &mut report).await;
        (report, result)
    }

    fn day_dir(root: &Path) -> PathBuf {
        root.join("foraged-data/cl61_files/W09A-ATMOS/202505/20250509")
    }

    #[tokio::test]
    async fn test_downloads_into_date_grouped_layout() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let catalog = MemoryCatalog::new().with_file(
            UPLOAD,
            VSN,
            record("cmscl6004_20250509_085340.nc"),
            "ceilometer",
        );

        let (report, result) = run(&catalog, &ctx, &cl61_job()).await;
        result.unwrap();

        let path = day_dir(root.path()).join("cmscl6004_20250509_085340.nc");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ceilometer");
        assert_eq!(report.summary.saved, 1);
        assert_eq!(
            report.files[0].outcome,
            DownloadOutcome::Saved { path, bytes: 10 }
        );
    }

    #[tokio::test]
    async fn test_second_run_skips_without_opening() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let catalog = MemoryCatalog::new()
            .with_file(UPLOAD, VSN, record("a_20250509_000000.nc"), "a")
            .with_file(UPLOAD, VSN, record("b_20250509_010000.nc"), "b");
        let job = cl61_job();

        let (first, _) = run(&catalog, &ctx, &job).await;
        assert_eq!(first.summary.saved, 2);
        assert_eq!(catalog.opened(), 2);

        let (second, result) = run(&catalog, &ctx, &job).await;
        result.unwrap();
        assert_eq!(second.summary.saved, 0);
        assert_eq!(second.summary.skipped_existing, 2);
        assert_eq!(catalog.opened(), 2);
    }

    #[tokio::test]
    async fn test_existing_file_is_left_untouched() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let existing = day_dir(root.path()).join("a_20250509_000000.nc");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, "curated by hand").unwrap();

        let catalog = MemoryCatalog::new().with_file(UPLOAD, VSN, record("a_20250509_000000.nc"), "remote");
        let (report, _) = run(&catalog, &ctx, &cl61_job()).await;

        assert_eq!(report.summary.skipped_existing, 1);
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "curated by hand");
        assert_eq!(catalog.opened(), 0);
    }

    #[tokio::test]
    async fn test_force_replaces_existing_file() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(
            root.path(),
            RunOptions {
                force: true,
                ..RunOptions::default()
            },
        );
        let existing = day_dir(root.path()).join("a_20250509_000000.nc");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, "stale").unwrap();

        let catalog = MemoryCatalog::new().with_file(UPLOAD, VSN, record("a_20250509_000000.nc"), "fresh");
        let (report, _) = run(&catalog, &ctx, &cl61_job()).await;

        assert_eq!(report.summary.saved, 1);
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_extension_filter_and_duplicates() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let catalog = MemoryCatalog::new()
            .with_file(UPLOAD, VSN, record("a_20250509_000000.nc"), "a")
            .with_file(UPLOAD, VSN, record("a_20250509_000000.nc"), "a")
            .with_file(UPLOAD, VSN, record("a_20250509_000000.nc.md5"), "sum")
            .with_file(UPLOAD, VSN, record("notes_20250509_000000.txt"), "txt");

        let (report, _) = run(&catalog, &ctx, &cl61_job()).await;

        assert_eq!(report.files.len(), 1);
        assert_eq!(report.summary.saved, 1);
        assert_eq!(catalog.opened(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_files_are_skipped_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let catalog = MemoryCatalog::new()
            .with_file(UPLOAD, VSN, record("readme.nc"), "no date")
            .with_file(UPLOAD, VSN, record("a_20250509_000000.nc"), "a");

        let (report, result) = run(&catalog, &ctx, &cl61_job()).await;
        result.unwrap();

        assert_eq!(report.summary.skipped_invalid, 1);
        assert_eq!(report.summary.saved, 1);
    }

    #[tokio::test]
    async fn test_long_file_name_is_saved() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let name = format!("{}_20250509_000000.nc", "a".repeat(231));
        assert_eq!(name.len(), 250);
        let catalog = MemoryCatalog::new().with_file(UPLOAD, VSN, record(&name), "long");

        let (report, result) = run(&catalog, &ctx, &cl61_job()).await;
        result.unwrap();

        assert_eq!(report.summary.saved, 1, "{:?}", report.files);
        assert_eq!(
            std::fs::read_to_string(day_dir(root.path()).join(&name)).unwrap(),
            "long"
        );
    }

    #[test]
    fn test_part_prefix_is_bounded() {
        assert_eq!(part_prefix("a.nc"), ".a.nc.");

        let long = "x".repeat(300);
        assert_eq!(part_prefix(&long).len(), PART_NAME_MAX + 2);

        // Never splits a multi-byte character
        let wide = "é".repeat(100);
        let prefix = part_prefix(&wide);
        assert!(prefix.len() <= PART_NAME_MAX + 2);
        assert!(prefix.trim_matches('.').chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn test_site_metadata_cannot_escape_the_archive() {
        let root = tempfile::tempdir().unwrap();
        let archive = root.path().join("archive");
        let ctx = context(&archive, RunOptions::default());
        let mut job = cl61_job();
        job.site = None;
        let catalog = MemoryCatalog::new().with_file(
            UPLOAD,
            VSN,
            record_with_meta("a_20250509_000000.nc", &[("site", "x/../../../../escaped")]),
            "a",
        );

        let (report, result) = run(&catalog, &ctx, &job).await;
        result.unwrap();

        assert_eq!(report.summary.skipped_invalid, 1);
        assert_eq!(catalog.opened(), 0);
        assert!(!root.path().join("escaped").exists());
        assert!(!archive.exists());
    }

    #[tokio::test]
    async fn test_interrupted_download_leaves_nothing_behind() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let catalog = MemoryCatalog::new()
            .with_interrupted_file(UPLOAD, VSN, record("a_20250509_000000.nc"), "partial")
            .with_file(UPLOAD, VSN, record("b_20250509_010000.nc"), "b");

        let (report, result) = run(&catalog, &ctx, &cl61_job()).await;
        result.unwrap();

        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.saved, 1);
        // a.nc retried up to the attempt limit, b.nc opened once
        assert_eq!(catalog.opened(), DEFAULT_MAX_ATTEMPTS as usize + 1);

        let names: Vec<String> = std::fs::read_dir(day_dir(root.path()))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b_20250509_010000.nc".to_string()]);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let catalog = MemoryCatalog::new().with_failing_file(UPLOAD, VSN, record("a_20250509_000000.nc"), 401);

        let (report, result) = run(&catalog, &ctx, &cl61_job()).await;
        result.unwrap();

        assert_eq!(report.summary.failed, 1);
        assert_eq!(catalog.opened(), 1);
        assert!(!day_dir(root.path()).exists());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(
            root.path(),
            RunOptions {
                dry_run: true,
                ..RunOptions::default()
            },
        );
        let catalog = MemoryCatalog::new()
            .with_file(UPLOAD, VSN, record("a_20250509_000000.nc"), "a")
            .with_file(UPLOAD, VSN, record("b_20250509_010000.nc"), "b");

        let (report, _) = run(&catalog, &ctx, &cl61_job()).await;

        assert_eq!(report.summary.would_save, 2);
        assert_eq!(catalog.opened(), 0);
        assert!(!root.path().join("foraged-data").exists());
    }

    #[tokio::test]
    async fn test_limit_caps_candidates() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(
            root.path(),
            RunOptions {
                limit: Some(1),
                ..RunOptions::default()
            },
        );
        let catalog = MemoryCatalog::new()
            .with_file(UPLOAD, VSN, record("a_20250509_000000.txt"), "skipped by filter")
            .with_file(UPLOAD, VSN, record("b_20250509_010000.nc"), "b")
            .with_file(UPLOAD, VSN, record("c_20250509_020000.nc"), "c");

        let (report, _) = run(&catalog, &ctx, &cl61_job()).await;

        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].file, "b_20250509_010000.nc");
    }

    #[tokio::test]
    async fn test_original_path_violation_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let job = cl61_job_with(RawJob {
            keep_original_path: Some(true),
            mount_dir: Some("/data".into()),
            ..RawJob::default()
        });
        let catalog = MemoryCatalog::new()
            .with_file(
                UPLOAD,
                VSN,
                record_with_meta("a.nc", &[("original_path", "/data/cl61/a.nc")]),
                "a",
            )
            .with_file(
                UPLOAD,
                VSN,
                record_with_meta("b.nc", &[("original_path", "/scratch/b.nc")]),
                "b",
            );

        let (report, result) = run(&catalog, &ctx, &job).await;

        assert!(result.is_err());
        assert_eq!(report.status, JobStatus::Running);
        assert!(report.files.is_empty());
        assert_eq!(catalog.opened(), 0);
        assert!(!root.path().join("cl61").exists());
    }

    #[tokio::test]
    async fn test_original_path_layout() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let job = cl61_job_with(RawJob {
            keep_original_path: Some(true),
            mount_dir: Some("/data".into()),
            ..RawJob::default()
        });
        let catalog = MemoryCatalog::new().with_file(
            UPLOAD,
            VSN,
            record_with_meta(
                "1718744500000000000-a.nc",
                &[("original_path", "/data/cl61/2025/a.nc")],
            ),
            "a",
        );

        let (report, result) = run(&catalog, &ctx, &job).await;
        result.unwrap();

        assert_eq!(report.summary.saved, 1);
        assert!(root.path().join("cl61/2025/a.nc").is_file());
    }

    #[tokio::test]
    async fn test_catalog_failure_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), RunOptions::default());
        let catalog = MemoryCatalog::new().with_unavailable_upload(UPLOAD, "HTTP 503");

        let (_, result) = run(&catalog, &ctx, &cl61_job()).await;
        assert!(matches!(result, Err(crate::error::CuratorError::Catalog(_))));
    }
}
