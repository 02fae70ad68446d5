//! Softirq configuration

use crate::error::ConfigError;
use crate::{MBUF_DEFAULT_LEN, RUNTIME_SOFTIRQ_BUDGET, SOFTIRQ_MAX_BUDGET};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-runtime softirq configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftirqConfig {
    /// Commands processed per pass when the caller doesn't pick a budget
    #[serde(default = "default_budget")]
    pub budget: usize,

    /// Length RX offsets are resolved with
    #[serde(default = "default_rx_buf_len")]
    pub rx_buf_len: usize,

    /// Deferred softirq threads allowed in flight at once
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// Minimum spacing between rate-limited error logs (milliseconds)
    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,
}

impl Default for SoftirqConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            rx_buf_len: default_rx_buf_len(),
            max_threads: default_max_threads(),
            log_interval_ms: default_log_interval_ms(),
        }
    }
}

fn default_budget() -> usize {
    RUNTIME_SOFTIRQ_BUDGET
}

fn default_rx_buf_len() -> usize {
    MBUF_DEFAULT_LEN
}

fn default_max_threads() -> usize {
    64
}

fn default_log_interval_ms() -> u64 {
    1000
}

impl SoftirqConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, falling back to defaults if it is missing
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)
        } else {
            log::debug!("No softirq config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Reject values the dispatcher cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget == 0 || self.budget > SOFTIRQ_MAX_BUDGET {
            return Err(ConfigError::Invalid {
                field: "budget",
                reason: format!("must be in 1..={SOFTIRQ_MAX_BUDGET}, got {}", self.budget),
            });
        }
        if self.rx_buf_len == 0 {
            return Err(ConfigError::Invalid {
                field: "rx_buf_len",
                reason: "must be non-zero".into(),
            });
        }
        if self.max_threads == 0 {
            return Err(ConfigError::Invalid {
                field: "max_threads",
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// Rate-limit interval as a duration
    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }
}
