//! Layered runner configuration.
//!
//! Sources, lowest priority first: built-in defaults, the TOML file, `RUNNER_*`
//! environment variables (`__` separates nesting, e.g. `RUNNER_STORE__ENDPOINT`),
//! `BLOB_BUCKET`, then command-line arguments.

use anyhow::{Context, Result, ensure};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "pipeline-runner.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bucket receiving status documents, responses and packages
    pub bucket: String,
    pub store: StoreConfig,
    pub flush_interval_ms: u64,
    pub sample_interval_ms: u64,
    /// Process-name filter for memory samples; disabled when unset
    pub memory_filter: Option<String>,
    /// Sample `df` on every sampling cycle
    pub sample_disk: bool,
    /// Root for per-job scratch directories
    pub work_dir: PathBuf,
    pub package_prefix: String,
    pub verbose: bool,
    pub json_logs: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of an HTTP object store
    pub endpoint: Option<String>,
    /// Directory for the filesystem store
    pub root: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            store: StoreConfig::default(),
            flush_interval_ms: 5_000,
            sample_interval_ms: 10_000,
            memory_filter: None,
            sample_disk: true,
            work_dir: std::env::temp_dir().join("pipeline-runner"),
            package_prefix: "pkg".to_string(),
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Load configuration, optionally overlaying serialized CLI arguments.
    ///
    /// Only fields present in `cli_args` override; use
    /// `skip_serializing_if = "Option::is_none"` on optional arguments.
    pub fn new<T: Serialize>(config_file: Option<&Path>, cli_args: Option<&T>) -> Result<Self> {
        let path = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config: Self = Self::figment(path, cli_args)
            .extract()
            .context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the background loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.flush_interval_ms > 0,
            "flush_interval_ms must be greater than zero"
        );
        ensure!(
            self.sample_interval_ms > 0,
            "sample_interval_ms must be greater than zero"
        );
        Ok(())
    }

    fn figment<T: Serialize>(path: &Path, cli_args: Option<&T>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUNNER_").split("__"))
            .merge(Env::raw().only(&["BLOB_BUCKET"]).map(|_| "bucket".into()));

        if let Some(args) = cli_args {
            figment = figment.merge(Serialized::defaults(args));
        }

        figment
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Overrides {
        bucket: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        memory_filter: Option<String>,
    }

    fn missing_file() -> PathBuf {
        PathBuf::from("/nonexistent/pipeline-runner-test.toml")
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = AppConfig::figment(&missing_file(), None::<&Overrides>)
            .extract()
            .unwrap();
        assert_eq!(config.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.sample_interval(), Duration::from_secs(10));
        assert!(config.sample_disk);
        assert_eq!(config.package_prefix, "pkg");
    }

    #[test]
    fn test_cli_args_override_defaults() {
        let args = Overrides {
            bucket: "cli-bucket".to_string(),
            memory_filter: Some("node".to_string()),
        };
        let config: AppConfig = AppConfig::figment(&missing_file(), Some(&args))
            .extract()
            .unwrap();
        assert_eq!(config.bucket, "cli-bucket");
        assert_eq!(config.memory_filter.as_deref(), Some("node"));
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.toml");

        std::fs::write(&path, "flush_interval_ms = 0\n").unwrap();
        let err = AppConfig::new(Some(&path), None::<&Overrides>).unwrap_err();
        assert!(err.to_string().contains("flush_interval_ms"));

        std::fs::write(&path, "sample_interval_ms = 0\n").unwrap();
        let err = AppConfig::new(Some(&path), None::<&Overrides>).unwrap_err();
        assert!(err.to_string().contains("sample_interval_ms"));

        std::fs::write(&path, "sample_interval_ms = 1\n").unwrap();
        assert!(AppConfig::new(Some(&path), None::<&Overrides>).is_ok());
    }

    #[test]
    fn test_toml_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.toml");
        std::fs::write(
            &path,
            "bucket = \"file-bucket\"\nflush_interval_ms = 250\n\n[store]\nroot = \"/srv/objects\"\n",
        )
        .unwrap();

        let config: AppConfig = AppConfig::figment(&path, None::<&Overrides>)
            .extract()
            .unwrap();
        assert_eq!(config.flush_interval(), Duration::from_millis(250));
        assert_eq!(config.store.root, Some(PathBuf::from("/srv/objects")));
    }
}
