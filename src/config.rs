//! Construction-time configuration for the memory model.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Configuration accepted by [`UnifiedMemoryModel`](crate::UnifiedMemoryModel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Memory ceiling for live entries, in megabytes
    pub max_memory_mb: u64,
    /// Maximum number of live entries
    pub max_entries: usize,
    /// Seconds between reclaimer cycles
    pub cleanup_interval_secs: u64,
    /// Age in days after which persisted rows are purged
    pub retention_days: u32,
    /// Location of the durable store (`None` keeps it in memory)
    pub db_path: Option<PathBuf>,
    /// SQLite busy timeout in milliseconds
    pub busy_timeout_ms: u64,
    /// Number of phases whose correlations are kept in the read-through cache
    pub correlation_cache_capacity: usize,
    /// Per-phase performance ledger cap
    pub ledger_capacity: usize,
    /// Records kept when a ledger overflows its cap
    pub ledger_trim_to: usize,
    /// Violation log cap
    pub violation_log_capacity: usize,
    /// Violations kept when the log overflows its cap
    pub violation_log_trim_to: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 500,
            max_entries: 10_000,
            cleanup_interval_secs: 300,
            retention_days: 30,
            db_path: None,
            busy_timeout_ms: 5_000,
            correlation_cache_capacity: 256,
            ledger_capacity: 1_000,
            ledger_trim_to: 500,
            violation_log_capacity: 100,
            violation_log_trim_to: 50,
        }
    }
}

impl MemoryConfig {
    /// Configuration backed by a SQLite file at `path`.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self::default().with_db_path(path)
    }

    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = mb;
        self
    }

    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    pub fn with_cleanup_interval_secs(mut self, secs: u64) -> Self {
        self.cleanup_interval_secs = secs;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn with_correlation_cache_capacity(mut self, capacity: usize) -> Self {
        self.correlation_cache_capacity = capacity;
        self
    }

    /// Override the ledger cap and the size it is trimmed to on overflow.
    pub fn with_ledger_limits(mut self, capacity: usize, trim_to: usize) -> Self {
        self.ledger_capacity = capacity;
        self.ledger_trim_to = trim_to;
        self
    }

    /// Memory ceiling in bytes.
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Durable store location with `~` expanded.
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        self.db_path.as_ref().map(|p| {
            let raw = p.to_string_lossy();
            PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
        })
    }

    /// Reject bounds the model cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_mb == 0 {
            return Err(Error::config("max_memory_mb must be positive"));
        }
        if self.max_entries == 0 {
            return Err(Error::config("max_entries must be positive"));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(Error::config("cleanup_interval_secs must be positive"));
        }
        if self.retention_days == 0 {
            return Err(Error::config("retention_days must be positive"));
        }
        if self.correlation_cache_capacity == 0 {
            return Err(Error::config("correlation_cache_capacity must be positive"));
        }
        if self.ledger_capacity == 0 || self.ledger_trim_to > self.ledger_capacity {
            return Err(Error::config(format!(
                "ledger trim size {} must not exceed a positive capacity {}",
                self.ledger_trim_to, self.ledger_capacity
            )));
        }
        if self.violation_log_capacity == 0
            || self.violation_log_trim_to > self.violation_log_capacity
        {
            return Err(Error::config(format!(
                "violation log trim size {} must not exceed a positive capacity {}",
                self.violation_log_trim_to, self.violation_log_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.max_memory_mb, 500);
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.cleanup_interval_secs, 300);
        assert_eq!(config.retention_days, 30);
        assert!(config.db_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_bounds() {
        assert!(MemoryConfig::default().with_max_entries(0).validate().is_err());
        assert!(MemoryConfig::default().with_max_memory_mb(0).validate().is_err());
        assert!(MemoryConfig::default()
            .with_cleanup_interval_secs(0)
            .validate()
            .is_err());
        assert!(MemoryConfig::default().with_retention_days(0).validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_ledger_limits() {
        let config = MemoryConfig::default().with_ledger_limits(10, 20);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_max_memory_bytes() {
        let config = MemoryConfig::default().with_max_memory_mb(2);
        assert_eq!(config.max_memory_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_tilde_expansion() {
        let config = MemoryConfig::persistent("~/phase-memory.db");
        let resolved = config.resolved_db_path().unwrap();
        assert!(!resolved.to_string_lossy().starts_with('~') || std::env::var("HOME").is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: MemoryConfig =
            serde_json::from_str(r#"{"max_entries": 42, "retention_days": 7}"#).unwrap();
        assert_eq!(config.max_entries, 42);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.max_memory_mb, 500);
    }
}
