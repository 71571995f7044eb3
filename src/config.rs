//! Process configuration.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! environment variables:
//!
//! | Variable | Field |
//! | --- | --- |
//! | `CONDUCTOR_DATABASE_URL`, else `DATABASE_URL` | `database_url` |
//! | `CONDUCTOR_STAGING_ROOT` | `staging_root` |
//! | `CONDUCTOR_SOURCE_ROOT` | `source_root` |
//! | `CONDUCTOR_LOG` | `log_filter` |

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_POOL_SIZE: u32 = 4;
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_MAX_STEPS: usize = crate::pipeline::services::DEFAULT_MAX_STEPS;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}")]
    Read {
        /// File path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for [`ConductorConfig`].
    #[error("invalid configuration in {}", .path.as_ref().map_or("input", |p| p.as_str()))]
    Parse {
        /// File path, when loaded from disk.
        path: Option<Utf8PathBuf>,
        /// Parser error.
        #[source]
        source: Box<toml::de::Error>,
    },

    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A command needs the database but no URL is configured.
    #[error("no database URL configured; set CONDUCTOR_DATABASE_URL or database_url")]
    MissingDatabaseUrl,
}

/// Settings for the conductor process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConductorConfig {
    /// `PostgreSQL` connection URL.
    pub database_url: Option<String>,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// How often the change listener polls for notifications.
    pub listen_poll_interval_ms: u64,
    /// Root under which each run gets a staging directory.
    pub staging_root: Utf8PathBuf,
    /// Directory scanned for files to download.
    pub source_root: Option<Utf8PathBuf>,
    /// Step cap for a single `run-all`.
    pub max_steps_per_run_all: usize,
    /// Default `tracing` filter directive.
    pub log_filter: String,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            pool_size: DEFAULT_POOL_SIZE,
            listen_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            staging_root: Utf8PathBuf::from("./staging"),
            source_root: None,
            max_steps_per_run_all: DEFAULT_MAX_STEPS,
            log_filter: "info".to_owned(),
        }
    }
}

impl ConductorConfig {
    /// Loads the file at `path` (if any) and applies process environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or a
    /// value is out of range.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(file) => Self::read_file(file)?,
            None => Self::default(),
        };
        let config = base.with_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse {
            path: None,
            source: Box::new(err),
        })
    }

    fn read_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let read_failed = |source: io::Error| ConfigError::Read {
            path: path.to_owned(),
            source,
        };
        let file_name = path
            .file_name()
            .ok_or_else(|| read_failed(io::Error::other("path must include a file name")))?;
        let parent = path
            .parent()
            .filter(|dir| !dir.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let text = Dir::open_ambient_dir(parent, ambient_authority())
            .and_then(|dir| dir.read_to_string(file_name))
            .map_err(read_failed)?;
        toml::from_str(&text).map_err(|err| ConfigError::Parse {
            path: Some(path.to_owned()),
            source: Box::new(err),
        })
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value. Blank values are ignored.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = get("CONDUCTOR_DATABASE_URL").or_else(|| get("DATABASE_URL")) {
            self.database_url = Some(url);
        }
        if let Some(root) = get("CONDUCTOR_STAGING_ROOT") {
            self.staging_root = Utf8PathBuf::from(root);
        }
        if let Some(root) = get("CONDUCTOR_SOURCE_ROOT") {
            self.source_root = Some(Utf8PathBuf::from(root));
        }
        if let Some(filter) = get("CONDUCTOR_LOG") {
            self.log_filter = filter;
        }
        self
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid {
                field: "pool_size",
                reason: "must be at least 1",
            });
        }
        if self.listen_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "listen_poll_interval_ms",
                reason: "must be at least 1",
            });
        }
        if self.max_steps_per_run_all == 0 {
            return Err(ConfigError::Invalid {
                field: "max_steps_per_run_all",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Returns the database URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDatabaseUrl`] when none is configured.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }

    /// Returns the listener poll interval.
    #[must_use]
    pub const fn listen_poll_interval(&self) -> Duration {
        Duration::from_millis(self.listen_poll_interval_ms)
    }
}
