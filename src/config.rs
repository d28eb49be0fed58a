/*!
 * Configuration types for ferry
 */

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for relay operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes for ranged fetches
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,

    /// Chunk fetches in flight per object
    #[serde(default = "default_concurrency")]
    pub max_concurrent_chunks: usize,

    /// Item downloads in flight per batch
    #[serde(default = "default_concurrency")]
    pub max_concurrent_batch_items: usize,

    /// Independent batches in flight
    #[serde(default = "default_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Rate-limit handling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Minimum spacing between progress reports, in milliseconds
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// Where temporary artifacts are created
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Per-object size ceilings
    #[serde(default)]
    pub size_limits: SizeLimits,

    /// Lifetime of the duplicate-detection set
    #[serde(default)]
    pub dedup_scope: DedupScope,

    /// Pause between consecutive items of a range relay, in milliseconds
    #[serde(default = "default_item_delay")]
    pub item_delay_ms: u64,

    /// Pause between individual uploads when a bulk upload falls back, in milliseconds
    #[serde(default = "default_upload_delay")]
    pub upload_delay_ms: u64,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            max_concurrent_chunks: default_concurrency(),
            max_concurrent_batch_items: default_concurrency(),
            max_concurrent_batches: default_concurrent_batches(),
            rate_limit: RateLimitConfig::default(),
            progress_interval_ms: default_progress_interval(),
            download_dir: default_download_dir(),
            size_limits: SizeLimits::default(),
            dedup_scope: DedupScope::Run,
            item_delay_ms: default_item_delay(),
            upload_delay_ms: default_upload_delay(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Retry budgets for rate-limit signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Retries for bulk copy and bulk upload
    #[serde(default = "default_retries")]
    pub bulk_retries: u32,

    /// Retries for chunk fetches, item downloads and single uploads
    #[serde(default = "default_retries")]
    pub unit_retries: u32,

    /// Fixed margin added to every mandated wait, in seconds
    #[serde(default = "default_margin_secs")]
    pub margin_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            bulk_retries: default_retries(),
            unit_retries: default_retries(),
            margin_secs: default_margin_secs(),
        }
    }
}

/// Two-tier object size ceiling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeLimits {
    #[serde(default = "default_standard_max")]
    pub standard_max_bytes: u64,

    #[serde(default = "default_elevated_max")]
    pub elevated_max_bytes: u64,

    /// Whether the elevated quota applies
    #[serde(default)]
    pub elevated: bool,
}

impl SizeLimits {
    /// The ceiling that applies to this account
    pub fn max_bytes(&self) -> u64 {
        if self.elevated {
            self.elevated_max_bytes
        } else {
            self.standard_max_bytes
        }
    }

    pub fn permits(&self, size: u64) -> bool {
        size <= self.max_bytes()
    }
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            standard_max_bytes: default_standard_max(),
            elevated_max_bytes: default_elevated_max(),
            elevated: false,
        }
    }
}

/// How long a content identity stays in the duplicate-detection set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupScope {
    /// Shared by every batch of one relay invocation
    #[default]
    Run,

    /// Fresh for every batch
    Batch,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_chunk_size() -> u64 {
    4 * 1024 * 1024 // 4 MiB
}

fn default_concurrency() -> usize {
    5
}

fn default_concurrent_batches() -> usize {
    3
}

fn default_retries() -> u32 {
    1
}

fn default_margin_secs() -> u64 {
    2
}

fn default_progress_interval() -> u64 {
    1000
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_standard_max() -> u64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}

fn default_elevated_max() -> u64 {
    4 * 1024 * 1024 * 1024 // 4 GiB
}

fn default_item_delay() -> u64 {
    500
}

fn default_upload_delay() -> u64 {
    500
}

impl TransferConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TransferConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TransferError::Config(format!("TOML serialize error: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_bytes == 0 {
            return Err(TransferError::Config(
                "chunk_size_bytes must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("max_concurrent_chunks", self.max_concurrent_chunks),
            ("max_concurrent_batch_items", self.max_concurrent_batch_items),
            ("max_concurrent_batches", self.max_concurrent_batches),
        ] {
            if value == 0 {
                return Err(TransferError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.size_limits.elevated_max_bytes < self.size_limits.standard_max_bytes {
            return Err(TransferError::Config(
                "size_limits.elevated_max_bytes is below standard_max_bytes".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a configuration for accounts that get throttled often
    pub fn gentle_preset() -> Self {
        Self {
            max_concurrent_chunks: 2,
            max_concurrent_batch_items: 2,
            max_concurrent_batches: 1,
            item_delay_ms: 2000,
            upload_delay_ms: 1000,
            ..Default::default()
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn upload_delay(&self) -> Duration {
        Duration::from_millis(self.upload_delay_ms)
    }

    pub fn rate_limit_margin(&self) -> Duration {
        Duration::from_secs(self.rate_limit.margin_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size_bytes, 4_194_304);
        assert_eq!(config.max_concurrent_chunks, 5);
        assert_eq!(config.max_concurrent_batch_items, 5);
        assert_eq!(config.max_concurrent_batches, 3);
        assert_eq!(config.rate_limit.bulk_retries, 1);
        assert_eq!(config.rate_limit.unit_retries, 1);
        assert_eq!(config.dedup_scope, DedupScope::Run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_size_limit_tiers() {
        let mut limits = SizeLimits::default();
        assert_eq!(limits.max_bytes(), 2 * 1024 * 1024 * 1024);
        assert!(!limits.permits(3 * 1024 * 1024 * 1024));

        limits.elevated = true;
        assert_eq!(limits.max_bytes(), 4 * 1024 * 1024 * 1024);
        assert!(limits.permits(3 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = TransferConfig {
            chunk_size_bytes: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TransferError::Config(_))));

        let config = TransferConfig {
            max_concurrent_batch_items: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_batch_items"));
    }

    #[test]
    fn test_gentle_preset() {
        let config = TransferConfig::gentle_preset();
        assert_eq!(config.max_concurrent_chunks, 2);
        assert_eq!(config.max_concurrent_batches, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialization() {
        let config = TransferConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let deserialized: TransferConfig = toml::from_str(&toml).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
chunk_size_bytes = 1048576
dedup_scope = "batch"
log_level = "debug"

[rate_limit]
margin_secs = 5

[size_limits]
elevated = true
"#;

        let config: TransferConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chunk_size_bytes, 1_048_576);
        assert_eq!(config.dedup_scope, DedupScope::Batch);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.rate_limit.margin_secs, 5);
        assert_eq!(config.rate_limit.bulk_retries, 1);
        assert!(config.size_limits.elevated);
        assert_eq!(config.max_concurrent_chunks, 5);
        assert_eq!(config.download_dir, PathBuf::from("downloads"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.toml");

        let config = TransferConfig::gentle_preset();
        config.to_file(&path).unwrap();
        let loaded = TransferConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
    }
}
