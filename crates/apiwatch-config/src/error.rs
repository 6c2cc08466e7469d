//! Configuration errors.

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("endpoint #{index}: {message}")]
    InvalidEndpoint { index: usize, message: String },

    #[error("duplicate endpoint name: {0}")]
    DuplicateEndpoint(String),

    #[error("invalid duration '{value}' for {field}")]
    InvalidDuration { field: String, value: String },

    #[error("unknown auth profile '{name}' referenced by {referrer}")]
    UnknownAuthProfile { name: String, referrer: String },

    #[error("unknown data source '{name}' referenced by {referrer}")]
    UnknownDataSource { name: String, referrer: String },
}
