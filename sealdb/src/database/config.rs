//! Connection configuration and parameters.
//!
//! Everything a [`Connection`](super::Connection) needs at open time is
//! supplied by value through [`ConnectionConfig`]. Nothing here reads files
//! or the environment.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::native::OpenMode;
use crate::random::{RandomSource, ThreadRandom};
use crate::retry::{BusyRetryController, RetryPolicy};

/// Length of encryption key material in bytes.
pub const KEY_LEN: usize = 32;

/// Default number of prepared statements cached per connection.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 16;

/// Default limit for text and blob parameter values.
pub const DEFAULT_MAX_VALUE_LEN: usize = 1_000_000_000;

/// Smallest and largest accepted page size exponents (512 B to 64 KiB).
pub const PAGE_SIZE_EXPONENT_RANGE: std::ops::RangeInclusive<u8> = 9..=16;

/// Durability strategy of the database journal.
///
/// # Examples
///
/// ```
/// use sealdb::JournalMode;
///
/// assert_eq!(JournalMode::default(), JournalMode::Wal);
/// assert_eq!(JournalMode::parse("wal").unwrap(), JournalMode::Wal);
/// assert_eq!(JournalMode::Truncate.to_string(), "TRUNCATE");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Rollback journal deleted at commit.
    Delete,
    /// Rollback journal truncated at commit.
    Truncate,
    /// Rollback journal header zeroed at commit.
    Persist,
    /// Rollback journal kept in memory.
    Memory,
    /// Write-ahead log.
    #[default]
    Wal,
    /// No journal.
    Off,
}

impl JournalMode {
    /// All modes, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Delete,
        Self::Truncate,
        Self::Persist,
        Self::Memory,
        Self::Wal,
        Self::Off,
    ];

    /// The keyword used in `PRAGMA journal_mode`.
    #[must_use]
    pub const fn as_pragma(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
            Self::Wal => "WAL",
            Self::Off => "OFF",
        }
    }

    /// Parses a journal mode, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an unknown mode.
    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_pragma().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::invalid("journal_mode", format!("unknown journal mode '{s}'")))
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_pragma())
    }
}

impl FromStr for JournalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Encryption key material.
///
/// The `Debug` output never includes the key bytes.
///
/// # Examples
///
/// ```
/// use sealdb::Key;
///
/// let key = Key::from_hex(&"ab".repeat(32)).unwrap();
/// assert_eq!(key.as_bytes()[0], 0xab);
/// assert!(Key::from_bytes(&[0_u8; 16]).is_err());
/// assert_eq!(format!("{key:?}"), "Key(<redacted>)");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// Builds a key from exactly [`KEY_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for any other length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::invalid(
                "key",
                format!("expected {KEY_LEN} bytes, got {}", bytes.len()),
            )
        })?;
        Ok(Self(array))
    }

    /// Builds a key from [`KEY_LEN`] * 2 hex digits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for bad length or non-hex input.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() != KEY_LEN * 2 {
            return Err(Error::invalid(
                "key",
                format!("expected {} hex digits, got {}", KEY_LEN * 2, hex.len()),
            ));
        }
        let mut bytes = [0_u8; KEY_LEN];
        for (byte, pair) in bytes.iter_mut().zip(hex.as_bytes().chunks(2)) {
            let digits = std::str::from_utf8(pair)
                .map_err(|_| Error::invalid("key", "key must be ASCII hex"))?;
            *byte = u8::from_str_radix(digits, 16)
                .map_err(|_| Error::invalid("key", format!("'{digits}' is not hex")))?;
        }
        Ok(Self(bytes))
    }

    /// The raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

/// Configuration for opening a [`Connection`](super::Connection).
///
/// # Examples
///
/// ```
/// use sealdb::{ConnectionConfig, JournalMode, Key};
///
/// let config = ConnectionConfig::new("app")
///     .with_key(Key::from_bytes(&[7; 32]).unwrap())
///     .with_journal_mode(JournalMode::Truncate)
///     .with_statement_cache_capacity(4);
///
/// assert_eq!(config.name, "app");
/// assert_eq!(config.journal_mode, JournalMode::Truncate);
/// assert!(config.key.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Logical database name, resolved by a [`PathProvider`](super::PathProvider).
    pub name: String,
    /// Key applied before any other statement; `None` opens unencrypted.
    pub key: Option<Key>,
    /// Journal mode applied after key validation.
    pub journal_mode: JournalMode,
    /// How the file is opened.
    pub mode: OpenMode,
    /// Maximum number of cached prepared statements; 0 disables caching.
    pub statement_cache_capacity: usize,
    /// Maximum length in bytes of a bound text or blob value.
    pub max_value_len: usize,
    /// Page size as a power of two, applied before the journal mode.
    pub page_size_exponent: Option<u8>,
    /// Busy-retry parameters.
    pub retry: RetryPolicy,
    /// Jitter source for busy retries.
    pub random: Arc<dyn RandomSource>,
}

impl ConnectionConfig {
    /// Creates a configuration with default settings.
    ///
    /// Default settings:
    /// - no key
    /// - `journal_mode`: WAL
    /// - `mode`: read-write, create if missing
    /// - `statement_cache_capacity`: 16
    /// - `max_value_len`: 1 000 000 000 bytes
    /// - engine default page size
    /// - [`RetryPolicy::default`] with [`ThreadRandom`] jitter
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            journal_mode: JournalMode::default(),
            mode: OpenMode::default(),
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
            max_value_len: DEFAULT_MAX_VALUE_LEN,
            page_size_exponent: None,
            retry: RetryPolicy::default(),
            random: Arc::new(ThreadRandom),
        }
    }

    /// Sets the encryption key.
    #[must_use]
    pub fn with_key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    /// Sets the journal mode.
    #[must_use]
    pub const fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Sets the statement cache capacity.
    #[must_use]
    pub const fn with_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Sets the maximum text/blob value length.
    #[must_use]
    pub const fn with_max_value_len(mut self, len: usize) -> Self {
        self.max_value_len = len;
        self
    }

    /// Sets the busy-retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets the jitter source for busy retries.
    #[must_use]
    pub fn with_random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Sets the page size to `2^exponent` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `exponent` is outside `9..=16`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sealdb::ConnectionConfig;
    ///
    /// assert!(ConnectionConfig::new("app").with_page_size_exponent(12).is_ok());
    /// assert!(ConnectionConfig::new("app").with_page_size_exponent(8).is_err());
    /// ```
    pub fn with_page_size_exponent(mut self, exponent: u8) -> Result<Self> {
        if !PAGE_SIZE_EXPONENT_RANGE.contains(&exponent) {
            return Err(Error::invalid(
                "page_size_exponent",
                format!("{exponent} is outside {PAGE_SIZE_EXPONENT_RANGE:?}"),
            ));
        }
        self.page_size_exponent = Some(exponent);
        Ok(self)
    }

    /// Sets the open mode.
    #[must_use]
    pub const fn with_open_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Opens the database read-only.
    #[must_use]
    pub const fn read_only(self) -> Self {
        self.with_open_mode(OpenMode::ReadOnly)
    }

    /// The page size in bytes, if one is configured.
    #[must_use]
    pub fn page_size(&self) -> Option<u32> {
        self.page_size_exponent.map(|exponent| 1_u32 << exponent)
    }

    pub(crate) fn retry_controller(&self) -> BusyRetryController {
        BusyRetryController::new(self.retry, Arc::clone(&self.random))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("main");
        assert_eq!(config.name, "main");
        assert!(config.key.is_none());
        assert_eq!(config.journal_mode, JournalMode::Wal);
        assert_eq!(config.mode, OpenMode::ReadWriteCreate);
        assert_eq!(config.statement_cache_capacity, 16);
        assert_eq!(config.max_value_len, DEFAULT_MAX_VALUE_LEN);
        assert_eq!(config.page_size(), None);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_builder_chain() {
        let config = ConnectionConfig::new("main")
            .with_max_value_len(10)
            .with_retry_policy(RetryPolicy::no_retry())
            .read_only()
            .with_page_size_exponent(16)
            .unwrap();
        assert_eq!(config.max_value_len, 10);
        assert_eq!(config.retry.max_attempts, 0);
        assert_eq!(config.mode, OpenMode::ReadOnly);
        assert_eq!(config.page_size(), Some(65_536));
    }

    #[test]
    fn test_page_size_exponent_bounds() {
        assert!(ConnectionConfig::new("a").with_page_size_exponent(9).is_ok());
        assert!(ConnectionConfig::new("a").with_page_size_exponent(16).is_ok());
        assert!(ConnectionConfig::new("a").with_page_size_exponent(8).is_err());
        assert!(ConnectionConfig::new("a").with_page_size_exponent(17).is_err());
    }

    #[test]
    fn test_journal_mode_parse_and_display() {
        for mode in JournalMode::ALL {
            assert_eq!(JournalMode::parse(mode.as_pragma()).unwrap(), mode);
            assert_eq!(
                mode.to_string().to_lowercase().parse::<JournalMode>().unwrap(),
                mode
            );
        }
        assert!(JournalMode::parse("journal").is_err());
    }

    #[test]
    fn test_journal_mode_serde() {
        let json = serde_json::to_string(&JournalMode::Wal).unwrap();
        assert_eq!(json, "\"wal\"");
        let mode: JournalMode = serde_json::from_str("\"truncate\"").unwrap();
        assert_eq!(mode, JournalMode::Truncate);
    }

    #[test]
    fn test_key_from_hex() {
        let key = Key::from_hex(&"0F".repeat(32)).unwrap();
        assert_eq!(key.as_bytes(), &[0x0f; KEY_LEN]);

        assert!(Key::from_hex("abcd").is_err());
        assert!(Key::from_hex(&"zz".repeat(32)).is_err());
        assert!(Key::from_hex(&"é".repeat(32)).is_err());
    }

    #[test]
    fn test_key_from_bytes_length() {
        assert!(Key::from_bytes(&[1; KEY_LEN]).is_ok());
        assert!(Key::from_bytes(&[1; KEY_LEN - 1]).is_err());
        assert!(Key::from_bytes(&[1; KEY_LEN + 1]).is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = Key::from_bytes(&[0xaa; KEY_LEN]).unwrap();
        let debug = format!("{:?}", ConnectionConfig::new("x").with_key(key));
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("170"));
    }
}
