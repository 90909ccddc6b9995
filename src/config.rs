//! Engine configuration
//!
//! Every field has a default, so a partial JSON file (or `{}`) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::experiment::DEFAULT_CONFIDENCE_LEVEL;
use crate::{Error, Result};

/// Default interval between background snapshot flushes.
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;

/// Default interval between stale-experiment cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// Default retention of completed/stopped experiments.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Configuration for [`crate::AbTestEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Snapshot file. `None` keeps the engine purely in memory.
    pub data_path: Option<PathBuf>,
    /// Seconds between background flushes.
    pub flush_interval_secs: u64,
    /// Seconds between cleanup passes.
    pub cleanup_interval_secs: u64,
    /// Days an ended experiment is kept before cleanup removes it.
    pub retention_days: u32,
    /// Confidence level used when an experiment does not set one.
    pub default_confidence_level: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            default_confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Serialization` if it is
    /// malformed, or `InvalidInput` if values are out of range.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for zero intervals or a confidence level outside (0, 1).
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval_secs == 0 || self.cleanup_interval_secs == 0 {
            return Err(Error::InvalidInput(
                "flush and cleanup intervals must be at least one second".to_string(),
            ));
        }
        if !(self.default_confidence_level > 0.0 && self.default_confidence_level < 1.0) {
            return Err(Error::InvalidInput(format!(
                "default_confidence_level must be in (0, 1), got {}",
                self.default_confidence_level
            )));
        }
        Ok(())
    }

    /// Flush interval as a `Duration`.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Cleanup interval as a `Duration`.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Retention window as a `chrono::Duration`.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.data_path.is_none());
        assert_eq!(config.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.retention(), chrono::Duration::days(90));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"data_path": "/var/lib/ab/state.json", "retention_days": 7}"#)
            .unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.data_path, Some(PathBuf::from("/var/lib/ab/state.json")));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.cleanup_interval_secs, DEFAULT_CLEANUP_INTERVAL_SECS);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = EngineConfig {
            flush_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }
}
