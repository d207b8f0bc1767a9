//! Registry configuration.

use crate::connection::BackoffPolicy;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection-level options shared by every shape of a registry.
///
/// ```rust
/// use shape_sync::RegistryConfig;
///
/// let config = RegistryConfig::default()
///     .with_reconnect_delay_ms(250)
///     .with_max_reconnect_attempts(Some(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Reconnect after transport failures.
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Initial delay before the first reconnect attempt.
    /// Default: 1000ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the backoff delay, jitter included.
    /// Default: 30000ms
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,

    /// Growth factor per failed attempt.
    /// Default: 2
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    /// Fraction of the delay randomized in both directions.
    /// Default: 0.2 (+/-20%)
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    /// Reconnect attempts before giving up.
    /// Default: None (retry forever)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ratio: default_jitter_ratio(),
            max_reconnect_attempts: None,
        }
    }
}

impl RegistryConfig {
    /// Parse from JSON, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconnect_delay_ms == 0 {
            return Err(SyncError::Config("reconnect_delay_ms must be > 0".into()));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(SyncError::Config(format!(
                "max_reconnect_delay_ms ({}) is below reconnect_delay_ms ({})",
                self.max_reconnect_delay_ms, self.reconnect_delay_ms
            )));
        }
        if self.backoff_multiplier == 0 {
            return Err(SyncError::Config("backoff_multiplier must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(SyncError::Config(format!(
                "jitter_ratio must be within [0, 1], got {}",
                self.jitter_ratio
            )));
        }
        Ok(())
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_max_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Backoff policy derived from these options.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.reconnect_delay_ms),
            max: Duration::from_millis(self.max_reconnect_delay_ms),
            multiplier: self.backoff_multiplier.max(1),
            jitter_ratio: self.jitter_ratio.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay_ms, 1000);
        assert_eq!(config.max_reconnect_delay_ms, 30_000);
        assert_eq!(config.max_reconnect_attempts, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RegistryConfig::from_json_str(r#"{"reconnect_delay_ms": 50}"#).unwrap();
        assert_eq!(config.reconnect_delay_ms, 50);
        assert_eq!(config.max_reconnect_delay_ms, 30_000);
        assert!(config.auto_reconnect);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = RegistryConfig::from_json_str(
            r#"{"reconnect_delay_ms": 500, "max_reconnect_delay_ms": 100}"#,
        );
        assert!(matches!(result, Err(SyncError::Config(_))));

        let bad_jitter = RegistryConfig::default().with_jitter_ratio(1.5);
        assert!(bad_jitter.validate().is_err());
    }
}
