//! Engine configuration
//!
//! Deserializable from JSON so the host application can keep it next to
//! its own settings; every field has a default.
//!
//! ```rust
//! use trueno_ab::config::EngineConfig;
//!
//! # fn main() -> trueno_ab::Result<()> {
//! let config = EngineConfig::from_json(r#"{"cache_ttl_secs": 60}"#)?;
//! assert_eq!(config.cache_ttl_secs, 60);
//! assert!((config.default_epsilon - 0.1).abs() < f64::EPSILON);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default TTL of the running-experiments cache (5 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default bandit exploration rate
pub const DEFAULT_EPSILON: f64 = 0.1;

/// Default period of the scheduled bandit reallocation (1 hour)
pub const DEFAULT_REALLOCATION_INTERVAL_SECS: u64 = 3600;

const fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

const fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

const fn default_reallocation_interval_secs() -> u64 {
    DEFAULT_REALLOCATION_INTERVAL_SECS
}

/// Tunables for the experimentation engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long the running-experiments list is served before a refresh
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Exploration rate for bandit experiments that don't set their own
    #[serde(default = "default_epsilon")]
    pub default_epsilon: f64,
    /// Period of the scheduled reallocation task
    #[serde(default = "default_reallocation_interval_secs")]
    pub reallocation_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            default_epsilon: DEFAULT_EPSILON,
            reallocation_interval_secs: DEFAULT_REALLOCATION_INTERVAL_SECS,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// `Serialization` on malformed JSON, `Validation` on out-of-range values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the default exploration rate.
    #[must_use]
    pub const fn with_default_epsilon(mut self, epsilon: f64) -> Self {
        self.default_epsilon = epsilon;
        self
    }

    /// Set the reallocation period.
    #[must_use]
    pub const fn with_reallocation_interval(mut self, interval: Duration) -> Self {
        self.reallocation_interval_secs = interval.as_secs();
        self
    }

    /// Cache TTL as a `Duration`.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Reallocation period as a `Duration`.
    #[must_use]
    pub const fn reallocation_interval(&self) -> Duration {
        Duration::from_secs(self.reallocation_interval_secs)
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// `Validation` if epsilon is outside [0, 1] or the interval is zero.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_epsilon) {
            return Err(Error::validation("Epsilon must be between 0 and 1"));
        }
        if self.reallocation_interval_secs == 0 {
            return Err(Error::validation(
                "Reallocation interval must be at least one second",
            ));
        }
        Ok(())
    }
}
