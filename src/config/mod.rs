//! Application configuration
//!
//! Values are resolved in order: built-in defaults, a TOML file (an explicit
//! path, else `config.toml` in the platform config directory if present),
//! then `FIBRANT_*` environment variables. Command-line flags are applied by
//! the binary on top.

use crate::effect::Parallelism;
use crate::error::{Error, Result};
use crate::schedule::RetryConfig;
use crate::todos::FetchErrorKind;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const API_URL_ENV: &str = "FIBRANT_API_URL";
pub const PARALLELISM_ENV: &str = "FIBRANT_PARALLELISM";
pub const LOG_LEVEL_ENV: &str = "FIBRANT_LOG_LEVEL";

/// Get the platform configuration directory for fibrant
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "fibrant", "fibrant").map(|dirs| dirs.config_dir().to_path_buf())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: Option<String>,
    pub api: ApiConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://jsonplaceholder.typicode.com".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Concurrent user lookups: a positive integer or `"unbounded"`
    pub parallelism: Parallelism,
    /// Failure kinds worth retrying; `decode` is ignored
    pub retry_on: Vec<FetchErrorKind>,
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            parallelism: Parallelism::default(),
            retry_on: vec![FetchErrorKind::Transport, FetchErrorKind::Status],
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then `path` (or the default file if it exists), then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match config_dir().map(|dir| dir.join("config.toml")) {
                Some(default_path) if default_path.is_file() => Self::from_file(&default_path)?,
                _ => Self::default(),
            },
        };
        config.merge_env_vars()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn merge_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV) {
            self.api.base_url = url;
        }

        if let Some(parallelism) = lookup(PARALLELISM_ENV) {
            self.fetch.parallelism = parallelism.parse()?;
        }

        if let Some(log_level) = lookup(LOG_LEVEL_ENV) {
            self.log_level = Some(log_level);
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = AppConfig::new();
        assert_eq!(config.api.base_url, "https://jsonplaceholder.typicode.com");
        assert_eq!(config.fetch.parallelism, Parallelism::bounded(10).unwrap());
        assert_eq!(config.fetch.retry.attempts, 3);
        assert_eq!(
            config.fetch.retry_on,
            vec![FetchErrorKind::Transport, FetchErrorKind::Status]
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[api]
base_url = "http://localhost:8080"
request_timeout = "5s"

[fetch]
parallelism = "unbounded"
retry_on = ["transport"]

[fetch.retry]
attempts = 5
initial_delay = "50ms"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8080");
        assert_eq!(config.api.request_timeout, Duration::from_secs(5));
        assert_eq!(config.fetch.parallelism, Parallelism::Unbounded);
        assert_eq!(config.fetch.retry.attempts, 5);
        assert_eq!(config.fetch.retry.initial_delay, Duration::from_millis(50));
        assert_eq!(config.fetch.retry_on, vec![FetchErrorKind::Transport]);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (API_URL_ENV, "http://example.test"),
            (PARALLELISM_ENV, "4"),
            (LOG_LEVEL_ENV, "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::new();
        config
            .merge_env_from(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.api.base_url, "http://example.test");
        assert_eq!(config.fetch.parallelism, Parallelism::bounded(4).unwrap());
        assert_eq!(config.log_level.as_deref(), Some("trace"));
    }

    #[test]
    fn test_invalid_env_parallelism_rejected() {
        let mut config = AppConfig::new();
        let result = config.merge_env_from(|key| (key == PARALLELISM_ENV).then(|| "0".to_string()));
        assert!(matches!(result, Err(Error::InvalidParallelism(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = AppConfig::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let config = AppConfig::new();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("base_url = \"https://jsonplaceholder.typicode.com\""));
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
