//! Poller configuration.
//!
//! ```rust
//! use statekeep::PollerConfig;
//!
//! let config = PollerConfig::from_json(r#"{ "base_interval_ms": 250, "max_attempts": 10 }"#)?;
//! assert_eq!(config.backoff_factor, 2.0);
//! # Ok::<(), statekeep::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

fn default_base_interval_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

/// Timing and budget for a [`Poller`](crate::poller::Poller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Wait before the first check, and the unit that grows.
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    /// Multiplier applied to the wait after each `continue`.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Total attempts before the poller aborts. Unbounded when `None`.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Upper bound on the grown wait. Unbounded when `None`.
    #[serde(default)]
    pub max_interval_ms: Option<u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_base_interval_ms(),
            backoff_factor: default_backoff_factor(),
            max_attempts: None,
            max_interval_ms: None,
        }
    }
}

impl PollerConfig {
    pub fn new(base_interval: Duration, backoff_factor: f64) -> Self {
        Self {
            base_interval_ms: base_interval.as_millis() as u64,
            backoff_factor,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval_ms = Some(max_interval.as_millis() as u64);
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }

    pub fn max_interval(&self) -> Option<Duration> {
        self.max_interval_ms.map(Duration::from_millis)
    }

    /// The wait that follows `current` after a `continue`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        // Millisecond resolution keeps growth free of float drift.
        let grown_ms = (current.as_millis() as f64 * self.backoff_factor).round();
        let grown = Duration::from_millis(grown_ms.min(u64::MAX as f64) as u64);
        match self.max_interval() {
            Some(cap) => grown.min(cap),
            None => grown,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "base_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "backoff_factor",
                reason: format!("must be a finite value >= 1.0, got {}", self.backoff_factor),
            });
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_attempts",
                reason: "must allow at least one attempt".to_string(),
            });
        }
        if let Some(cap) = self.max_interval_ms {
            if cap < self.base_interval_ms {
                return Err(ConfigError::Invalid {
                    field: "max_interval_ms",
                    reason: format!("{} is below base_interval_ms {}", cap, self.base_interval_ms),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.base_interval(), Duration::from_secs(1));
        assert_eq!(config.backoff_factor, 2.0);
        assert!(config.max_attempts.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = PollerConfig::from_json(r#"{ "max_attempts": 3 }"#).unwrap();
        assert_eq!(config.base_interval_ms, 1000);
        assert_eq!(config.max_attempts, Some(3));
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = PollerConfig::from_json(r#"{ "backoff_factor": 0.5 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "backoff_factor",
                ..
            }
        ));

        let err = PollerConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_ranges() {
        let zero = PollerConfig::new(Duration::ZERO, 2.0);
        assert!(zero.validate().is_err());

        let no_attempts = PollerConfig::default().with_max_attempts(0);
        assert!(no_attempts.validate().is_err());

        let low_cap = PollerConfig::new(Duration::from_secs(2), 2.0)
            .with_max_interval(Duration::from_secs(1));
        assert!(low_cap.validate().is_err());

        let nan = PollerConfig::new(Duration::from_secs(1), f64::NAN);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_next_interval_grows_and_caps() {
        let config = PollerConfig::new(Duration::from_millis(100), 3.0)
            .with_max_interval(Duration::from_millis(500));

        let second = config.next_interval(config.base_interval());
        assert_eq!(second, Duration::from_millis(300));
        assert_eq!(config.next_interval(second), Duration::from_millis(500));
    }

    #[test]
    fn test_constant_interval_with_unit_factor() {
        let config = PollerConfig::new(Duration::from_millis(40), 1.0);
        assert_eq!(
            config.next_interval(Duration::from_millis(40)),
            Duration::from_millis(40)
        );
    }
}
