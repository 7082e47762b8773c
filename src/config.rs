//! Runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for a [`Runtime`](crate::Runtime)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Minimum timer resolution in seconds; shorter delays are clamped up
    pub min_delay_secs: f64,
    /// Maximum microtasks run in one drain pass (starvation protection)
    pub microtask_budget: usize,
    /// Log unhandled rejections at `warn` level
    pub warn_unhandled_rejections: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 1.0 / 60.0,
            microtask_budget: 10_000,
            warn_unhandled_rejections: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_delay_secs.is_finite() || self.min_delay_secs <= 0.0 {
            return Err(Error::Config(format!(
                "min_delay_secs must be a positive finite number, got {}",
                self.min_delay_secs
            )));
        }
        if self.microtask_budget == 0 {
            return Err(Error::Config("microtask_budget must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_secs_f64(self.min_delay_secs)
    }

    /// Clamp a requested delay. Non-finite, NaN, and sub-resolution values
    /// become the minimum.
    pub fn clamp_delay(&self, seconds: f64) -> f64 {
        if !(seconds >= self.min_delay_secs) || seconds.is_infinite() {
            self.min_delay_secs
        } else {
            seconds
        }
    }
}
