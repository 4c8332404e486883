//! Configuration for curriculum-content

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CurriculumError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("curriculum-content")
}

/// What a mutation does when another mutation on the same key is in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockPolicy {
    /// Wait for the in-flight mutation, up to `lock_timeout_ms`
    #[default]
    Queue,
    /// Fail immediately with a conflict
    Reject,
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Database file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Behaviour of concurrent mutations on one content item or unit
    #[serde(default)]
    pub lock_policy: LockPolicy,

    /// How long a queued mutation waits before giving up with a conflict
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Page size used by callers that do not pick one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound on search page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Event bus buffer
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_database_file() -> String {
    "curriculum.db".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            lock_policy: LockPolicy::Queue,
            lock_timeout_ms: default_lock_timeout_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CurriculumError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| CurriculumError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CurriculumError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CurriculumError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<(), CurriculumError> {
        if self.database_file.is_empty() {
            return Err(CurriculumError::Config("database_file must not be empty".into()));
        }
        if self.max_page_size == 0 {
            return Err(CurriculumError::Config("max_page_size must be >= 1".into()));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(CurriculumError::Config(format!(
                "default_page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        if self.event_capacity == 0 {
            return Err(CurriculumError::Config("event_capacity must be >= 1".into()));
        }
        Ok(())
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
