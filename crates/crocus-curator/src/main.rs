//! CROCUS File Curator - Main entry point

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use crocus_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use crocus_common::time::{run_stamp, Clock, SystemClock};
use crocus_curator::error::ConfigError;
use crocus_curator::report::{JobStatus, RunReport, EXIT_CONFIG_ERROR, EXIT_JOB_FAILED};
use crocus_curator::{BeehiveClient, Cli, CuratorConfig, JobRunner, RunContext};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Credentials and endpoint overrides may live in a .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ctx = RunContext::new(&cli.root_dir)
        .with_clock(clock)
        .with_options(cli.run_options());

    let log_config = LogConfig::builder()
        .level(if cli.debug { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Both)
        .format(cli.log_format)
        .log_dir(ctx.log_dir())
        .log_file_name(format!("log_{}.log", run_stamp(ctx.clock.now())))
        .filter_directives("hyper=warn,reqwest=warn")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} ignoring LOG_* overrides: {:#}", "Warning:".yellow().bold(), e);
            log_config
        },
    };

    let guard = match init_logging(&log_config) {
        Ok(guard) => {
            for problem in guard.degraded() {
                eprintln!("{} {}", "Warning:".yellow().bold(), problem);
            }
            if guard.has_file() {
                info!(path = %log_config.log_file_path().display(), "Logging to file");
            }
            Some(guard)
        },
        Err(e) => {
            eprintln!("{} logging disabled: {:#}", "Warning:".yellow().bold(), e);
            None
        },
    };

    let code = match run(&cli, &ctx).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Curator failed");
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            EXIT_JOB_FAILED
        },
    };

    // process::exit skips destructors; flush the log file first
    drop(guard);
    process::exit(code);
}

async fn run(cli: &Cli, ctx: &RunContext) -> anyhow::Result<i32> {
    info!(config = %cli.config.display(), root_dir = %ctx.root_dir.display(), "Curator started");

    let config = match CuratorConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => return Ok(config_failure(&e)),
    };

    let credentials = match config.credentials() {
        Ok(credentials) => credentials,
        Err(e) => return Ok(config_failure(&e)),
    };

    let query_url = cli.query_url.clone().unwrap_or_else(|| config.query_url());
    let client =
        BeehiveClient::new(query_url, credentials).context("Failed to build Beehive client")?;
    info!(query_url = %client.query_url(), "Using Beehive catalog");

    let entries = config.job_entries(ctx.clock.today());
    let report = JobRunner::new(&client, ctx)
        .run_all(&entries, cli.job.as_deref())
        .await;

    print_summary(&report);

    if let Some(path) = &cli.summary_json {
        report
            .save_json(path)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    Ok(report.exit_code())
}

fn config_failure(err: &ConfigError) -> i32 {
    error!(error = %err, "Configuration error");
    eprintln!("{} {}", "Error:".red().bold(), err);
    EXIT_CONFIG_ERROR
}

fn print_summary(report: &RunReport) {
    println!();
    if report.dry_run {
        println!("{}", "Dry run: nothing was written".yellow());
    }

    for job in &report.jobs {
        let s = &job.summary;
        let status = match &job.status {
            JobStatus::Completed => "completed".green(),
            JobStatus::Running => "running".yellow(),
            JobStatus::Fatal { .. } => "failed".red().bold(),
            JobStatus::Invalid { .. } => "invalid".red(),
        };

        println!(
            "{} {}: saved {}, would save {}, skipped {} (existing {}, invalid {}), failed {}",
            status,
            job.name.bold(),
            s.saved,
            s.would_save,
            s.skipped(),
            s.skipped_existing,
            s.skipped_invalid,
            s.failed
        );

        if let JobStatus::Fatal { error } | JobStatus::Invalid { error } = &job.status {
            println!("  {} {}", "→".red(), error);
        }
    }

    for err in &report.config_errors {
        println!("{} {}", "✗".red(), err);
    }
}
