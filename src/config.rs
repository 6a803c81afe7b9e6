//! Configuration management for the search queue.
//!
//! Configuration can be set via environment variables:
//! - `VISUAL_SEARCH_MAX_CONCURRENT` - Optional. Maximum number of searches running at once. Defaults to `4`.
//!
//! Logging is configured by the binary through `RUST_LOG`.

use thiserror::Error;

/// Default number of searches a queue runs at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

const MAX_CONCURRENT_VAR: &str = "VISUAL_SEARCH_MAX_CONCURRENT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Search queue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of tasks running at once (at least 1)
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl QueueConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `VISUAL_SEARCH_MAX_CONCURRENT`
    /// is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let max_concurrent = match lookup(MAX_CONCURRENT_VAR) {
            Some(raw) => parse_max_concurrent(&raw)?,
            None => DEFAULT_MAX_CONCURRENT,
        };
        Ok(Self { max_concurrent })
    }

    /// Create a config with custom values (useful for testing).
    ///
    /// A limit of zero is raised to one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }
}

fn parse_max_concurrent(raw: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue(MAX_CONCURRENT_VAR.to_string(), reason);
    let value: usize = raw.trim().parse().map_err(|e| invalid(format!("{}", e)))?;
    if value == 0 {
        return Err(invalid("must be at least 1".to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = QueueConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
    }

    #[test]
    fn test_reads_max_concurrent() {
        let config = QueueConfig::from_lookup(|key| {
            (key == MAX_CONCURRENT_VAR).then(|| " 8 ".to_string())
        })
        .unwrap();
        assert_eq!(config.max_concurrent, 8);
    }

    #[test]
    fn test_rejects_zero_and_garbage() {
        let zero = QueueConfig::from_lookup(|_| Some("0".to_string()));
        assert!(matches!(zero, Err(ConfigError::InvalidValue(var, _)) if var == MAX_CONCURRENT_VAR));

        let garbage = QueueConfig::from_lookup(|_| Some("many".to_string()));
        assert!(garbage.is_err());
    }

    #[test]
    fn test_new_clamps_to_one() {
        assert_eq!(QueueConfig::new(0).max_concurrent, 1);
        assert_eq!(QueueConfig::new(3).max_concurrent, 3);
    }
}
