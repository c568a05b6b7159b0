//! Database configuration.

use crate::error::{CoreError, CoreResult};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for opening a database.
///
/// All tunables live here; there is no ambient global state. The
/// required field is the data directory; everything else has a
/// default and a builder-style setter.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one file per collection.
    pub data_dir: PathBuf,

    /// Memory cache tuning.
    pub cache: CacheConfig,

    /// How often the background auto-save flushes dirty collections
    /// (zero disables the background thread).
    pub autosave_interval: Duration,

    /// At-rest encryption; `None` stores plaintext files.
    pub encryption: Option<EncryptionConfig>,

    /// Soft ceiling on a persisted file's size; exceeding it logs a
    /// warning but never fails the write.
    pub max_file_size: u64,
}

/// Memory cache tuning.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached collections before LRU eviction.
    pub max_entries: usize,
    /// Time a cached collection stays valid, measured from load.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(300),
        }
    }
}

/// At-rest encryption settings.
#[derive(Clone)]
pub struct EncryptionConfig {
    /// Caller secret the file key is derived from.
    pub secret: String,
    /// Envelope algorithm; only `aes-256-gcm` is supported.
    pub algorithm: String,
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("secret", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl Config {
    /// Creates a configuration with default tunables.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: CacheConfig::default(),
            autosave_interval: Duration::from_secs(2),
            encryption: None,
            max_file_size: 8 * 1024 * 1024, // 8 MiB
        }
    }

    /// Sets the cache entry bound.
    #[must_use]
    pub fn cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache.max_entries = max_entries;
        self
    }

    /// Sets the cache TTL.
    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl = ttl;
        self
    }

    /// Sets the auto-save interval (zero disables the background thread).
    #[must_use]
    pub const fn autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    /// Enables at-rest encryption with the given secret.
    #[must_use]
    pub fn with_encryption(mut self, secret: impl Into<String>) -> Self {
        self.encryption = Some(EncryptionConfig {
            secret: secret.into(),
            algorithm: crate::crypto::ALGORITHM.to_string(),
        });
        self
    }

    /// Sets the soft file-size ceiling.
    #[must_use]
    pub const fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a zero cache bound or TTL.
    pub fn validate(&self) -> CoreResult<()> {
        if self.cache.max_entries == 0 {
            return Err(CoreError::validation("cache.max_entries must be at least 1"));
        }
        if self.cache.ttl.is_zero() {
            return Err(CoreError::validation("cache.ttl must be non-zero"));
        }
        if let Some(encryption) = &self.encryption {
            if encryption.secret.len() < crate::crypto::MIN_SECRET_LEN {
                return Err(CoreError::validation(format!(
                    "encryption secret must be at least {} bytes",
                    crate::crypto::MIN_SECRET_LEN
                )));
            }
            if encryption.algorithm != crate::crypto::ALGORITHM {
                return Err(CoreError::validation(format!(
                    "unsupported encryption algorithm: {}",
                    encryption.algorithm
                )));
            }
        }
        Ok(())
    }
}
