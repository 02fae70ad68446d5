//! Error types for runtime operations

use thiserror::Error;

/// Softirq dispatch errors
///
/// "Nothing to do" is not an error; the entry points report it as `Ok(None)`
/// or `false`.
#[derive(Debug, Error)]
pub enum SoftirqError {
    /// Every deferred softirq thread permit is in use
    #[error("No softirq threads available ({0} in flight)")]
    NoThreads(usize),

    /// Dispatcher configuration was rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the config file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds an unusable value
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Result type for softirq operations
pub type Result<T> = std::result::Result<T, SoftirqError>;

impl SoftirqError {
    /// Check if retrying later (or falling back to the inline path) can help
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoThreads(_))
    }
}
