//! Application configuration management.
//!
//! Configuration is layered with figment, later layers winning:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. TOML file (`config.toml` in the platform config dir, or `--config`)
//! 3. Environment variables prefixed `OCRBATCH_`, `__` separating nested keys
//!    (e.g. `OCRBATCH_WORKERS__MAX_WORKERS=8`)
//! 4. Command-line overrides ([`ConfigOverrides`])

use directories::{BaseDirs, ProjectDirs};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_MAX_AGE_DAYS;
use crate::processor::WorkerConfig;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "OCRBATCH_";

/// Configuration file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while loading or saving configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A layer could not be parsed or extracted.
    #[error("Invalid configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values parsed but are inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Writing the configuration file failed.
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serializing to TOML failed.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Worker pool bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub max_workers_limit: usize,
    pub auto_adjust: bool,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        let defaults = WorkerConfig::default();
        Self {
            min_workers: defaults.min_workers,
            max_workers: defaults.max_workers,
            max_workers_limit: defaults.max_workers_limit,
            auto_adjust: defaults.auto_adjust,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the result cache.
    pub cache_dir: PathBuf,
    /// Entries older than this many days are discarded.
    pub max_age_days: u32,
    pub workers: WorkersConfig,
    /// Default per-attempt timeout in seconds.
    pub task_timeout_secs: u64,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Base of the exponential retry backoff, in milliseconds.
    pub backoff_base_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            workers: WorkersConfig::default(),
            task_timeout_secs: 300,
            max_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<WorkerOverrides>,
}

/// Worker overrides from the command line.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

impl Config {
    /// Build the full figment for `path` (or the default config file).
    #[must_use]
    pub fn figment(path: Option<&Path>, overrides: &ConfigOverrides) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match path.map(Path::to_path_buf).or_else(Self::default_config_path) {
            Some(file) => figment = figment.merge(Toml::file(file)),
            None => log::debug!("No config directory available, skipping config file"),
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
    }

    /// Load and validate the layered configuration.
    ///
    /// A missing config file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a layer is malformed or the result is invalid.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let config: Config = Self::figment(path, overrides)
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Load from `path` alone (defaults + file), falling back to defaults on error.
    #[must_use]
    pub fn load_from_path(path: &Path) -> Self {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .unwrap_or_else(|e| {
                log::warn!("Failed to load {}, using defaults: {}", path.display(), e);
                Self::default()
            })
    }

    /// Check that the values are usable.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.workers;
        if w.min_workers == 0 || w.max_workers == 0 || w.max_workers_limit == 0 {
            return Err(ConfigError::Invalid(
                "worker counts must be at least 1".to_string(),
            ));
        }
        if w.min_workers > w.max_workers_limit {
            return Err(ConfigError::Invalid(format!(
                "min_workers ({}) exceeds max_workers_limit ({})",
                w.min_workers, w.max_workers_limit
            )));
        }
        if self.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "task_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Worker settings for the processor.
    #[must_use]
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            min_workers: self.workers.min_workers,
            max_workers: self.workers.max_workers,
            max_workers_limit: self.workers.max_workers_limit,
            auto_adjust: self.workers.auto_adjust,
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            ..WorkerConfig::default()
        }
    }

    /// Default platform-specific configuration file.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "ocrbatch", "ocrbatch")
}

/// Platform cache directory, or `~/.ocr_cache` when none is known.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    if let Some(dirs) = project_dirs() {
        return dirs.cache_dir().to_path_buf();
    }
    BaseDirs::new()
        .map(|b| b.home_dir().join(".ocr_cache"))
        .unwrap_or_else(|| PathBuf::from(".ocr_cache"))
}
