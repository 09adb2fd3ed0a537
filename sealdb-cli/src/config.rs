//! YAML configuration file support.
//!
//! Every field is optional; anything left out falls back to the library
//! defaults. Unknown keys are rejected so typos do not go unnoticed.
//!
//! ```yaml
//! journal_mode: wal
//! statement_cache_capacity: 32
//! page_size_exponent: 12
//! pool:
//!   max_size: 8
//!   idle_timeout_ms: 30000
//!   retention: 2
//! retry:
//!   max_attempts: 20
//!   base_delay_ms: 5
//!   cap_ms: 500
//! ```

use std::path::Path;
use std::time::Duration;

use sealdb::database::PAGE_SIZE_EXPONENT_RANGE;
use sealdb::{JournalMode, PoolConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Journal mode applied when a connection opens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_mode: Option<JournalMode>,

    /// Prepared statements cached per connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_cache_capacity: Option<usize>,

    /// Page size as a power of two.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size_exponent: Option<u8>,

    /// Connection pool bounds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSection>,

    /// Busy retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySection>,
}

/// The `pool` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSection {
    /// Maximum number of connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
    /// Idle time in milliseconds before a connection may be closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
    /// Idle connections kept regardless of the idle timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<usize>,
}

/// The `retry` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    /// Attempts after the first one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Delay ceiling of the first retry, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    /// Upper bound on any delay, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_ms: Option<u64>,
}

impl FileConfig {
    /// Parses a configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Config`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&contents)
            .map_err(|e| CliError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Checks values that parse but are out of range.
    ///
    /// Returns one message per problem found.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if let Some(exponent) = self.page_size_exponent {
            if !PAGE_SIZE_EXPONENT_RANGE.contains(&exponent) {
                problems.push(format!(
                    "page_size_exponent {exponent} is outside {}..={}",
                    PAGE_SIZE_EXPONENT_RANGE.start(),
                    PAGE_SIZE_EXPONENT_RANGE.end()
                ));
            }
        }
        if let Some(PoolSection {
            max_size: Some(0), ..
        }) = self.pool
        {
            problems.push("pool.max_size must be at least 1".to_string());
        }
        if let Err(e) = self.retry_policy() {
            problems.push(e.to_string());
        }

        problems
    }

    /// The retry policy, with library defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns the library's validation error if `base_delay_ms` exceeds
    /// `cap_ms`.
    pub fn retry_policy(&self) -> Result<RetryPolicy, sealdb::Error> {
        let defaults = RetryPolicy::default();
        let Some(section) = &self.retry else {
            return Ok(defaults);
        };
        RetryPolicy::new(
            section.max_attempts.unwrap_or(defaults.max_attempts),
            section
                .base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            section.cap_ms.map_or(defaults.cap, Duration::from_millis),
        )
    }

    /// The pool bounds, with `default_size` when `pool.max_size` is unset.
    pub fn pool_config(&self, default_size: usize) -> PoolConfig {
        let section = self.pool.clone().unwrap_or_default();
        let mut config = PoolConfig::new(section.max_size.unwrap_or(default_size));
        if let Some(ms) = section.idle_timeout_ms {
            config = config.with_idle_timeout(Duration::from_millis(ms));
        }
        if let Some(retention) = section.retention {
            config = config.with_retention(retention);
        }
        config
    }
}
