//! Cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sizing and timing knobs for a [`ConnCache`](crate::ConnCache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of buckets, and the maximum number of cached connections
    pub capacity: usize,

    /// How long an idle connection may stay cached, in milliseconds
    pub keep_alive_ms: u64,

    /// Sweep period in milliseconds; twice the keep-alive when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval_ms: Option<u64>,
}

impl CacheConfig {
    /// Create a config with the default sweep period
    pub fn new(capacity: usize, keep_alive: Duration) -> Self {
        Self {
            capacity,
            keep_alive_ms: keep_alive.as_millis() as u64,
            sweep_interval_ms: None,
        }
    }

    /// Override the sweep period
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Keep-alive as a `Duration`
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Effective sweep period
    pub fn sweep_interval(&self) -> Duration {
        let ms = self
            .sweep_interval_ms
            .unwrap_or_else(|| self.keep_alive_ms.saturating_mul(2));
        Duration::from_millis(ms)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig(
                "capacity must be greater than 0".to_string(),
            ));
        }
        if self.keep_alive_ms == 0 {
            return Err(Error::InvalidConfig(
                "keep_alive_ms must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "sweep_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sweep_interval() {
        let config = CacheConfig::new(16, Duration::from_millis(1500));
        assert_eq!(config.sweep_interval(), Duration::from_millis(3000));

        let config = config.with_sweep_interval(Duration::from_millis(250));
        assert_eq!(config.sweep_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_validate() {
        assert!(CacheConfig::new(16, Duration::from_secs(1)).validate().is_ok());
        assert!(CacheConfig::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(CacheConfig::new(16, Duration::ZERO).validate().is_err());
        assert!(CacheConfig::new(16, Duration::from_secs(1))
            .with_sweep_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_json() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"capacity": 64, "keep_alive_ms": 2000}"#).unwrap();
        assert_eq!(config.capacity, 64);
        assert_eq!(config.sweep_interval_ms, None);
        assert_eq!(config.sweep_interval(), Duration::from_secs(4));
    }
}
