//! Persisted record types.

use serde::{Deserialize, Serialize};

/// Separates the endpoint name from the timestamp in event keys.
pub(crate) const KEY_SEPARATOR: char = '\0';

/// One probe attempt, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckEvent {
    pub endpoint_name: String,
    pub environment: String,
    pub url: String,
    pub http_method: String,
    /// Milliseconds since the Unix epoch (UTC).
    pub checked_at_ms: u64,
    pub is_success: bool,
    pub http_status: Option<u16>,
    pub reason: String,
    pub details: Option<String>,
    pub latency_ms: u64,
    pub json_pointer: Option<String>,
    pub expected_value: Option<String>,
}

impl CheckEvent {
    /// Composite key: `{endpoint}\0{checked_at_ms:020}`.
    pub fn table_key(&self) -> String {
        event_key(&self.endpoint_name, self.checked_at_ms)
    }
}

/// A single point of an endpoint's latency/success trend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrendPoint {
    pub checked_at_ms: u64,
    pub latency_ms: u64,
    pub is_success: bool,
}

impl From<&CheckEvent> for TrendPoint {
    fn from(event: &CheckEvent) -> Self {
        Self {
            checked_at_ms: event.checked_at_ms,
            latency_ms: event.latency_ms,
            is_success: event.is_success,
        }
    }
}

pub(crate) fn event_key(endpoint: &str, checked_at_ms: u64) -> String {
    format!("{endpoint}{KEY_SEPARATOR}{checked_at_ms:020}")
}
