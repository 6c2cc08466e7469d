//! Event store errors. Each variant names the table, key, or endpoint
//! involved so a failed append or query can be traced to its row.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open event store at {location}: {message}")]
    Open { location: String, message: String },

    #[error("event store {operation} transaction failed: {message}")]
    Transaction {
        operation: &'static str,
        message: String,
    },

    #[error("cannot open table '{table}': {message}")]
    Table {
        table: &'static str,
        message: String,
    },

    #[error("reading '{key}' from '{table}' failed: {message}")]
    Read {
        table: &'static str,
        key: String,
        message: String,
    },

    #[error("writing '{key}' to '{table}' failed: {message}")]
    Write {
        table: &'static str,
        key: String,
        message: String,
    },

    #[error("cannot encode event for endpoint '{endpoint}': {message}")]
    Encode { endpoint: String, message: String },

    #[error("corrupt event in '{table}' at '{key}': {message}")]
    Decode {
        table: &'static str,
        key: String,
        message: String,
    },
}
