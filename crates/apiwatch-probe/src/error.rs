//! Probe engine error types.
//!
//! Everything here is converted into an `Exception` check result at the
//! scheduler boundary; nothing escapes an endpoint loop.

use thiserror::Error;

pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("data source '{0}' not found")]
    DataSourceNotFound(String),

    #[error("data source '{data_source}': {message}")]
    DataSource { data_source: String, message: String },

    #[error("query '{query}' on '{data_source}' failed: {message}")]
    Query {
        data_source: String,
        query: String,
        message: String,
    },

    #[error("config error: {0}")]
    Config(#[from] apiwatch_config::ConfigError),

    #[error("unsupported http method: {0}")]
    InvalidMethod(String),

    #[error("auth error: {0}")]
    Auth(#[from] apiwatch_auth::AuthError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response body is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] apiwatch_store::StoreError),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("notification failed: {0}")]
    Notify(String),
}
