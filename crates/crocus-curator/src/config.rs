//! Curator config file
//!
//! ```yaml
//! username: alice            # or CROCUS_USERNAME
//! password: secret           # or CROCUS_PASSWORD
//! query_url: https://...     # optional, or CROCUS_QUERY_URL
//! jobs:
//!   - job: cl61-atmos
//!     upload_name: cl61_files
//!     vsn: W09A
//!     site: ATMOS
//!     start_date: 2025-05-01
//!     date_pattern: '_(\d{8})_\d{6}'
//! ```
//!
//! Jobs are kept as raw YAML until [`CuratorConfig::job_entries`] so that one
//! malformed entry cannot stop the others from loading.

use crate::catalog::beehive::{Credentials, DEFAULT_QUERY_URL};
use crate::error::ConfigError;
use crate::job::{InvalidJob, JobEntry, JobSpec, RawJob};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Environment variable overriding the config's `username`
pub const ENV_USERNAME: &str = "CROCUS_USERNAME";

/// Environment variable overriding the config's `password`
pub const ENV_PASSWORD: &str = "CROCUS_PASSWORD";

/// Environment variable overriding the config's `query_url`
pub const ENV_QUERY_URL: &str = "CROCUS_QUERY_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CuratorConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub query_url: Option<String>,
    #[serde(default)]
    pub jobs: Vec<serde_yaml::Value>,
}

impl CuratorConfig {
    /// Load and parse a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Err(ConfigError::Parse("config file is empty".to_string()));
        }
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Credentials from the environment, falling back to the file
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        merge_credentials(
            std::env::var(ENV_USERNAME).ok(),
            std::env::var(ENV_PASSWORD).ok(),
            self.username.clone(),
            self.password.clone(),
        )
    }

    /// Query endpoint: environment, then file, then the public Beehive API
    pub fn query_url(&self) -> String {
        first_non_blank([std::env::var(ENV_QUERY_URL).ok(), self.query_url.clone()])
            .unwrap_or_else(|| DEFAULT_QUERY_URL.to_string())
    }

    /// Validate every job; `today` fills in missing end dates
    pub fn job_entries(&self, today: NaiveDate) -> Vec<JobEntry> {
        let mut seen = HashSet::new();
        self.jobs
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let entry = parse_job(index, value, today);
                match entry {
                    JobEntry::Valid(job) if !seen.insert(job.name.clone()) => {
                        JobEntry::Invalid(InvalidJob {
                            error: ConfigError::DuplicateJob(job.name.clone()),
                            name: job.name,
                        })
                    },
                    other => other,
                }
            })
            .collect()
    }
}

fn parse_job(index: usize, value: &serde_yaml::Value, today: NaiveDate) -> JobEntry {
    let label = value
        .get("job")
        .and_then(serde_yaml::Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("jobs[{index}]"));

    let raw: RawJob = match serde_yaml::from_value(value.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            return JobEntry::Invalid(InvalidJob {
                error: ConfigError::Parse(format!("{label}: {e}")),
                name: label,
            })
        },
    };

    if raw.job.as_deref().is_none_or(|name| name.trim().is_empty()) {
        return JobEntry::Invalid(InvalidJob {
            error: ConfigError::missing(&label, "job"),
            name: label,
        });
    }

    match JobSpec::from_raw(raw, today) {
        Ok(job) => JobEntry::Valid(job),
        Err(error) => JobEntry::Invalid(InvalidJob { name: label, error }),
    }
}

/// Pick each credential half from the environment first, then the file
fn merge_credentials(
    env_username: Option<String>,
    env_password: Option<String>,
    file_username: Option<String>,
    file_password: Option<String>,
) -> Result<Credentials, ConfigError> {
    let username = first_non_blank([env_username, file_username]);
    let password = first_non_blank([env_password, file_password]);
    match (username, password) {
        (Some(username), Some(password)) => Ok(Credentials::new(username, password)),
        _ => Err(ConfigError::MissingCredentials),
    }
}

fn first_non_blank<const N: usize>(values: [Option<String>; N]) -> Option<String> {
    values
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    const CONFIG: &str = r#"
username: alice
password: secret
jobs:
  - job: cl61-atmos
    upload_name: cl61_files
    vsn: W09A
    site: ATMOS
    start_date: 2025-05-01
    date_pattern: '_(\d{8})_\d{6}'
  - upload_name: licor
    vsn: W08D
    start_date: 2025-05-01
  - job: broken-dates
    upload_name: licor
    vsn: W08D
    start_date: not-a-date
  - job: cl61-atmos
    upload_name: cl61_files
    vsn: W09A
    start_date: 2025-05-01
    group_by_date: false
  - "just a string"
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = CuratorConfig::load(file.path()).unwrap();
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.jobs.len(), 5);
    }

    #[test]
    fn test_missing_file() {
        let err = CuratorConfig::load("/nonexistent/crocus.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            CuratorConfig::from_yaml_str("jobs: [unclosed"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            CuratorConfig::from_yaml_str("   \n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_job_entries_isolate_bad_definitions() {
        let config = CuratorConfig::from_yaml_str(CONFIG).unwrap();
        let entries = config.job_entries(today());
        assert_eq!(entries.len(), 5);

        assert!(matches!(&entries[0], JobEntry::Valid(job) if job.name == "cl61-atmos"));

        match &entries[1] {
            JobEntry::Invalid(invalid) => {
                assert_eq!(invalid.name, "jobs[1]");
                assert!(matches!(invalid.error, ConfigError::MissingField { field: "job", .. }));
            },
            other => panic!("expected invalid entry, got {other:?}"),
        }

        match &entries[2] {
            JobEntry::Invalid(invalid) => {
                assert_eq!(invalid.name, "broken-dates");
                assert!(matches!(invalid.error, ConfigError::InvalidField { field: "start_date", .. }));
            },
            other => panic!("expected invalid entry, got {other:?}"),
        }

        match &entries[3] {
            JobEntry::Invalid(invalid) => {
                assert!(matches!(invalid.error, ConfigError::DuplicateJob(_)));
            },
            other => panic!("expected duplicate, got {other:?}"),
        }

        assert!(matches!(&entries[4], JobEntry::Invalid(invalid) if invalid.name == "jobs[4]"));
    }

    #[test]
    fn test_environment_credentials_take_precedence() {
        let creds = merge_credentials(
            Some("env-user".into()),
            Some("env-pass".into()),
            Some("file-user".into()),
            Some("file-pass".into()),
        )
        .unwrap();
        assert_eq!(creds, Credentials::new("env-user", "env-pass"));

        let creds = merge_credentials(Some("  ".into()), None, Some("file-user".into()), Some("file-pass".into()))
            .unwrap();
        assert_eq!(creds, Credentials::new("file-user", "file-pass"));
    }

    #[test]
    fn test_missing_credentials() {
        assert!(matches!(
            merge_credentials(None, None, Some("alice".into()), None),
            Err(ConfigError::MissingCredentials)
        ));
    }
}
