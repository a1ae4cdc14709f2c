//! Job runner
//!
//! Executes the configured jobs one after another. Every job runs inside its
//! own tracing span and its own error boundary: a fatal error, or even a
//! panic, in one job is recorded in its report and the next job starts as
//! if nothing happened.

use crate::catalog::Catalog;
use crate::context::RunContext;
use crate::error::ConfigError;
use crate::fetcher::Fetcher;
use crate::job::{JobEntry, JobSpec};
use crate::report::{JobReport, JobStatus, RunReport};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, info_span, warn, Instrument};

pub struct JobRunner<'a> {
    catalog: &'a dyn Catalog,
    ctx: &'a RunContext,
}

impl<'a> JobRunner<'a> {
    pub fn new(catalog: &'a dyn Catalog, ctx: &'a RunContext) -> Self {
        Self { catalog, ctx }
    }

    /// Run every entry, or only the one named `only_job`
    pub async fn run_all(&self, entries: &[JobEntry], only_job: Option<&str>) -> RunReport {
        let mut run = RunReport::new(self.ctx.clock.now(), self.ctx.options.dry_run);

        let selected: Vec<&JobEntry> = match only_job {
            Some(name) => {
                let matching: Vec<&JobEntry> = entries.iter().filter(|e| e.name() == name).collect();
                if matching.is_empty() {
                    let err = ConfigError::UnknownJob(name.to_string());
                    error!(job = name, "{}", err);
                    run.config_errors.push(err.to_string());
                }
                matching
            },
            None => entries.iter().collect(),
        };

        info!(jobs = selected.len(), dry_run = self.ctx.options.dry_run, "Starting curator run");

        for entry in selected {
            let report = match entry {
                JobEntry::Valid(job) => self.run_job(job).await,
                JobEntry::Invalid(invalid) => {
                    error!(job = %invalid.name, error = %invalid.error, "Skipping invalid job definition");
                    JobReport::invalid(&invalid.name, invalid.error.to_string(), self.ctx.clock.now())
                },
            };
            run.jobs.push(report);
        }

        run.finished_at = Some(self.ctx.clock.now());
        run
    }

    async fn run_job(&self, job: &JobSpec) -> JobReport {
        let span = info_span!("job", name = %job.name);

        async {
            info!(
                upload_name = %job.upload_name,
                vsn = %job.vsn,
                start_date = %job.start_date,
                end_date = %job.end_date,
                "Job started"
            );

            let mut report = JobReport::new(&job.name, self.ctx.clock.now());
            let fetcher = Fetcher::new(self.catalog, self.ctx);
            let result = AssertUnwindSafe(fetcher.run(job, &mut report))
                .catch_unwind()
                .await;

            let now = self.ctx.clock.now();
            match result {
                Ok(Ok(())) => report.complete(now),
                Ok(Err(e)) => {
                    error!(error = %e, "Job aborted");
                    report.fail(e.to_string(), now);
                },
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(panic = %message, "Job panicked");
                    report.fail(format!("job panicked: {message}"), now);
                },
            }

            log_summary(&report);
            report
        }
        .instrument(span)
        .await
    }
}

fn log_summary(report: &JobReport) {
    let s = &report.summary;
    match &report.status {
        JobStatus::Fatal { error } => warn!(
            saved = s.saved,
            skipped = s.skipped(),
            failed = s.failed,
            error = %error,
            "Job ended early"
        ),
        _ => info!(
            saved = s.saved,
            would_save = s.would_save,
            skipped_existing = s.skipped_existing,
            skipped_invalid = s.skipped_invalid,
            failed = s.failed,
            "Job finished"
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::{FileRecord, MemoryCatalog};
    use crate::config::CuratorConfig;
    use crate::report::{EXIT_CONFIG_ERROR, EXIT_JOB_FAILED, EXIT_OK};
    use chrono::{NaiveDate, TimeZone, Utc};
    use crocus_common::time::FixedClock;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const CONFIG: &str = r#"
jobs:
  - job: licor
    upload_name: licor_files
    vsn: W08D
    site: NEIU
    start_date: 2025-05-09
    end_date: 2025-05-09
    group_by_date: false
    extension: csv
  - job: cl61
    upload_name: cl61_files
    vsn: W09A
    site: ATMOS
    start_date: 2025-05-09
    end_date: 2025-05-09
    date_pattern: '_(\d{8})_\d{6}'
  - job: mirror
    upload_name: mirror_files
    vsn: W09A
    start_date: 2025-05-09
    end_date: 2025-05-09
    keep_original_path: true
    mount_dir: /data
  - job: broken
    upload_name: cl61_files
    start_date: 2025-05-09
"#;

    fn record(vsn: &str, name: &str, meta: &[(&str, &str)]) -> FileRecord {
        let metadata: BTreeMap<String, String> = meta
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FileRecord::from_url(format!("mem://storage/{vsn}/{name}"), metadata)
            .with_timestamp(Utc.with_ymd_and_hms(2025, 5, 9, 12, 0, 0).unwrap())
    }

    fn entries() -> Vec<JobEntry> {
        CuratorConfig::from_yaml_str(CONFIG)
            .unwrap()
            .job_entries(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
    }

    fn context(root: &std::path::Path) -> RunContext {
        RunContext::new(root).with_clock(Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap(),
        )))
    }

    #[tokio::test]
    async fn test_failing_jobs_do_not_stop_siblings() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let catalog = MemoryCatalog::new()
            .with_unavailable_upload("licor_files", "HTTP 503 from query endpoint")
            .with_file(
                "cl61_files",
                "W09A",
                record("W09A", "a_20250509_000000.nc", &[]),
                "a",
            )
            .with_file(
                "mirror_files",
                "W09A",
                record("W09A", "m.nc", &[("original_path", "/elsewhere/m.nc")]),
                "m",
            );

        let run = JobRunner::new(&catalog, &ctx).run_all(&entries(), None).await;

        assert_eq!(run.jobs.len(), 4);
        assert!(run.job("licor").unwrap().is_fatal());
        assert_eq!(run.job("cl61").unwrap().status, JobStatus::Completed);
        assert_eq!(run.job("cl61").unwrap().summary.saved, 1);
        assert!(run.job("mirror").unwrap().is_fatal());
        assert!(run.job("broken").unwrap().is_invalid());
        assert_eq!(run.exit_code(), EXIT_JOB_FAILED);

        assert!(root
            .path()
            .join("foraged-data/cl61_files/W09A-ATMOS/202505/20250509/a_20250509_000000.nc")
            .is_file());
        assert!(!root.path().join("elsewhere").exists());
    }

    #[tokio::test]
    async fn test_single_job_selection() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let catalog = MemoryCatalog::new().with_unavailable_upload("licor_files", "down");

        let run = JobRunner::new(&catalog, &ctx)
            .run_all(&entries(), Some("cl61"))
            .await;

        assert_eq!(run.jobs.len(), 1);
        assert_eq!(run.jobs[0].name, "cl61");
        assert_eq!(run.exit_code(), EXIT_OK);
    }

    #[tokio::test]
    async fn test_unknown_job_runs_nothing() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path());
        let catalog = MemoryCatalog::new();

        let run = JobRunner::new(&catalog, &ctx)
            .run_all(&entries(), Some("does-not-exist"))
            .await;

        assert!(run.jobs.is_empty());
        assert_eq!(run.config_errors.len(), 1);
        assert_eq!(run.exit_code(), EXIT_CONFIG_ERROR);
    }
}
