//! Telemetry poller configuration
//!
//! Loaded from YAML. Durations are written the same way users pick them in the UI
//! (`30s`, `1h30m`) and go through the duration parser on load.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::duration::{parse_duration, parse_interval};
use crate::errors::{Result, TelemetryError};

/// configuration settings for the telemetry poller
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Prometheus (or Thanos querier) base URL
    pub prometheus_url: String,
    /// Finest step the backend can serve; bounds the planned sample count
    #[serde(deserialize_with = "duration_text")]
    pub min_step: Duration,
    /// Per-fetch timeout; an expired fetch is recorded as a query error
    #[serde(deserialize_with = "duration_text")]
    pub fetch_timeout: Duration,
    /// Span shown when a view mounts
    #[serde(deserialize_with = "duration_text")]
    pub default_span: Duration,
    /// Explicit sample count, takes precedence over planning when set
    pub default_samples: Option<usize>,
    /// Refresh interval, `0` or `off` disables polling
    #[serde(deserialize_with = "interval_text")]
    pub poll_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            prometheus_url: "http://localhost:9090".to_string(),
            min_step: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(60),
            default_span: Duration::from_secs(30 * 60),
            default_samples: None,
            poll_interval: Duration::ZERO,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TelemetryConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prometheus_url.trim().is_empty() {
            return Err(TelemetryError::InvalidConfig(
                "prometheus_url must not be empty".to_string(),
            ));
        }
        if self.min_step.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "min_step must be greater than zero".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "fetch_timeout must be greater than zero".to_string(),
            ));
        }
        if self.default_span.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "default_span must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_text<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

fn interval_text<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_interval(&text).map_err(serde::de::Error::custom)
}
