//! Outcome of one probe attempt.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Closed set of outcome reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reason {
    #[serde(rename = "OK")]
    Ok,
    BadStatus,
    Slow,
    JsonMismatch,
    Exception,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Ok => "OK",
            Reason::BadStatus => "BadStatus",
            Reason::Slow => "Slow",
            Reason::JsonMismatch => "JsonMismatch",
            Reason::Exception => "Exception",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub endpoint: String,
    pub reason: Reason,
    /// Empty on success.
    pub details: String,
    pub elapsed: Duration,
    /// Status of the final response, when one was received.
    pub status: Option<u16>,
    /// Milliseconds since the Unix epoch at which the attempt started.
    pub checked_at_ms: u64,
}

impl CheckResult {
    pub fn ok(endpoint: &str, elapsed: Duration, status: u16) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            reason: Reason::Ok,
            details: String::new(),
            elapsed,
            status: Some(status),
            checked_at_ms: epoch_ms(),
        }
    }

    pub fn fail(
        endpoint: &str,
        reason: Reason,
        details: impl Into<String>,
        elapsed: Duration,
        status: Option<u16>,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            reason,
            details: details.into(),
            elapsed,
            status,
            checked_at_ms: epoch_ms(),
        }
    }

    /// A fault anywhere in binding, auth, transport, or parsing.
    pub fn exception(endpoint: &str, message: impl Into<String>) -> Self {
        Self::fail(endpoint, Reason::Exception, message, Duration::ZERO, None)
    }

    pub fn is_success(&self) -> bool {
        self.reason == Reason::Ok
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis() as u64
    }

    /// The HTTP status recorded with the event: the observed status for
    /// successes and `BadStatus` failures, nothing otherwise.
    pub fn persisted_status(&self) -> Option<u16> {
        match self.reason {
            Reason::Ok | Reason::BadStatus => self.status,
            Reason::Slow | Reason::JsonMismatch | Reason::Exception => None,
        }
    }
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
