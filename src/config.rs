//! Engine configuration.
//!
//! Configuration is a small TOML document. Every field is optional:
//!
//! ```toml
//! shards = 4            # entity allocation shards (1..=1024)
//! worker_threads = 8    # job pool size; omitted = one per core
//! log_filter = "info"   # tracing EnvFilter directive used by embedders
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::types::SHARD_BITS;


/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid TOML for [`EngineConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value outside its valid range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Runtime settings for [`ECSManager`](crate::ECSManager) and
/// [`JobScheduler`](crate::JobScheduler).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of entity allocation shards.
    pub shards: usize,

    /// Size of the job pool; `None` lets rayon pick.
    pub worker_threads: Option<usize>,

    /// `tracing_subscriber::EnvFilter` directive for embedders that install a
    /// subscriber from this config.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { shards: 4, worker_threads: None, log_filter: "info".to_owned() }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), ?config, "config loaded");
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_shards = 1usize << SHARD_BITS;
        if self.shards == 0 || self.shards > max_shards {
            return Err(ConfigError::Invalid {
                field: "shards",
                reason: format!("must be between 1 and {max_shards}, got {}", self.shards),
            });
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "log_filter",
                reason: "must not be blank".to_owned(),
            });
        }
        if self.worker_threads == Some(0) {
            return Err(ConfigError::Invalid {
                field: "worker_threads",
                reason: "must be at least 1 when set".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = EngineConfig::from_toml_str("shards = 2\nworker_threads = 3\nlog_filter = \"debug\"").unwrap();
        assert_eq!(config.shards, 2);
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn rejects_blank_log_filter() {
        assert!(matches!(
            EngineConfig::from_toml_str("log_filter = \"  \""),
            Err(ConfigError::Invalid { field: "log_filter", .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            EngineConfig::from_toml_str("shards = 0"),
            Err(ConfigError::Invalid { field: "shards", .. })
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("worker_threads = 0"),
            Err(ConfigError::Invalid { field: "worker_threads", .. })
        ));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(EngineConfig::from_toml_str("shard = 2"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let error = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(error.to_string().contains("/definitely/not/here.toml"));
    }
}
