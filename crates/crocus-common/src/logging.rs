//! Logging Configuration and Initialization
//!
//! Every CROCUS binary logs through `tracing`. A run can log to the console,
//! to a per-run log file, or both:
//!
//! - Console output goes to stderr so stdout stays free for run summaries
//! - File output goes to `{log_dir}/{log_file_name}`, one file per run
//!   (the curator uses `log_YYYYmmdd_HHMMSS.log` under `{root_dir}/logs`)
//! - Text or JSON formatting
//! - Environment overrides for level, output, format and extra filters
//!
//! A log file that cannot be opened or a filter directive that does not
//! parse never silences the run: logging falls back to stderr and the
//! problem is reported through [`LogGuard::degraded`].
//!
//! Use the structured macros (`debug!`, `info!`, `warn!`, `error!`) with
//! fields rather than formatted strings where a value is worth filtering on:
//!
//! ```rust
//! use tracing::warn;
//!
//! let file = "cmscl6004_20250509_085340.nc";
//! warn!(file, reason = "no date in filename", "Skipping file");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use crocus_common::logging::{init_logging, LogConfig, LogOutput};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::builder()
//!         .output(LogOutput::Both)
//!         .log_dir("/data/crocus/logs")
//!         .log_file_name("log_20250509_085340.log")
//!         .build();
//!     let _guard = init_logging(&config)?;
//!
//!     tracing::info!("Curator started");
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    filter::Directive, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stderr" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(anyhow::anyhow!("Invalid log output: {}", s)),
        }
    }
}

/// Line format, shared by console and file output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    /// JSON lines
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,

    /// Directory for the run log file
    pub log_dir: PathBuf,

    /// File name of the run log, e.g. "log_20250509_085340.log"
    pub log_file_name: String,

    /// Additional filter directives (e.g., "reqwest=warn,hyper=warn")
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_name: "crocus.log".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Apply environment overrides on top of this configuration
    ///
    /// Environment variables:
    /// - `LOG_LEVEL`: Log level (trace, debug, info, warn, error)
    /// - `LOG_OUTPUT`: Output target (console, file, both)
    /// - `LOG_FORMAT`: Log format (text, json)
    /// - `LOG_DIR`: Directory for the log file
    /// - `LOG_FILTER`: Additional filter directives
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.level = level.parse()?;
        }

        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.output = output.parse()?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.format = format.parse()?;
        }

        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }

        if let Ok(filter) = std::env::var("LOG_FILTER") {
            self.filter_directives = Some(filter);
        }

        Ok(self)
    }

    /// Full path of the run log file
    pub fn log_file_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file_name)
    }

    /// Create a builder for fluent configuration
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }
}

/// Builder for LogConfig
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.log_file_name = name.into();
        self
    }

    pub fn filter_directives(mut self, filter: impl Into<String>) -> Self {
        self.config.filter_directives = Some(filter.into());
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

/// Keeps the background log writer alive.
///
/// Dropping it flushes buffered lines to the log file, so hold it until the
/// process is about to exit.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    file: Option<WorkerGuard>,
    degraded: Vec<String>,
}

impl LogGuard {
    /// Whether lines are being written to the log file
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    /// What was requested but could not be set up
    pub fn degraded(&self) -> &[String] {
        &self.degraded
    }
}

/// Initialize logging with the given configuration
///
/// Sets the global subscriber; call once at startup. Fails only when a
/// global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard> {
    let mut degraded = Vec::new();

    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            match directive.parse::<Directive>() {
                Ok(parsed) => filter = filter.add_directive(parsed),
                Err(e) => degraded.push(format!("ignored log filter '{directive}': {e}")),
            }
        }
    }

    let file = if config.output.file() {
        match open_log_file(&config.log_dir, &config.log_file_name) {
            Ok(file) => Some(file),
            Err(e) => {
                degraded.push(format!("file logging disabled: {e:#}"));
                None
            },
        }
    } else {
        None
    };

    // Without a file there must still be somewhere for lines to go
    let console = config.output.console() || file.is_none();
    if console && !config.output.console() {
        degraded.push("logging to stderr instead".to_string());
    }

    let (writer, guard) = file.unzip();

    let console_layer = console.then(|| {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
        match config.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    });

    let file_layer = writer.map(|writer| {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(false)
            .with_ansi(false);
        match config.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard {
        file: guard,
        degraded,
    })
}

fn open_log_file(dir: &Path, file_name: &str) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    // One file per run; rotation is left to the scheduler's cleanup.
    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
